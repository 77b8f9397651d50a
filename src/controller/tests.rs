use super::*;
use crate::model::json::Flags;
use crate::model::{ConfigurationTree, EntityTree, Identity};
use crate::testing::{EntitySim, EntitySimConfig, VirtualInterface};
use crate::types::{MacAddress, UniqueIdentifier};

fn test_controller() -> Controller {
    let (interface, _link) = VirtualInterface::pair(MacAddress::new([2, 0, 0, 0, 0, 1]));
    Controller::with_interface(
        Box::new(interface),
        0x0001,
        UniqueIdentifier::new(0x0011_2233_0000_0001),
        ControllerConfig::default(),
    )
}

fn minimal_tree(entity_id: u64) -> EntityTree {
    let mut tree = EntityTree {
        identity: Identity {
            entity_id: UniqueIdentifier::new(entity_id),
            ..Identity::default()
        },
        ..EntityTree::default()
    };
    tree.configurations.insert(0, ConfigurationTree::default());
    tree
}

#[tokio::test(start_paused = true)]
async fn test_controller_id_derivation() {
    let controller = test_controller();
    assert_eq!(
        controller.controller_id(),
        UniqueIdentifier::new(0x0200_0000_0100_0001)
    );
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_entity_fast_reject() {
    let controller = test_controller();
    let unknown = UniqueIdentifier::new(0xDEAD_BEEF_DEAD_BEEF);

    assert_eq!(
        controller.set_entity_name(unknown, "Nope").await,
        Err(AemError::UnknownEntity)
    );
    assert_eq!(
        controller.acquire_entity(unknown, false).await,
        Err(AemError::UnknownEntity)
    );
    assert_eq!(
        controller
            .start_stream_input(unknown, 0)
            .await,
        Err(AemError::UnknownEntity)
    );

    let stream = StreamIdentification {
        entity_id: unknown,
        stream_index: 0,
    };
    assert_eq!(
        controller.connect_stream(stream, stream).await,
        Err(AcmpError::UnknownEntity)
    );
    assert_eq!(
        controller.get_listener_stream_state(stream).await,
        Err(AcmpError::UnknownEntity)
    );

    assert!(controller.entity(unknown).is_none());
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_import_dump_roundtrip() {
    let controller = test_controller();
    let mut events = controller.subscribe();

    let tree = minimal_tree(0x42);
    let dump = crate::model::json::create_json_object(&tree, Flags::full()).unwrap();

    let imported = controller
        .import_entity_model(&dump, Flags::full())
        .await
        .unwrap();
    assert_eq!(imported, UniqueIdentifier::new(0x42));

    // Importing announces the virtual entity
    let event = events.recv().await.unwrap();
    assert!(
        matches!(event, ControllerEvent::EntityOnline { entity_id } if entity_id == imported)
    );
    let guard = controller.entity(imported).expect("entity visible");
    assert_eq!(*guard.tree(), tree);

    // Dumping it back yields an equivalent object
    let dumped = controller.dump_entity_model(imported, Flags::full()).unwrap();
    assert_eq!(dumped, dump);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_import_duplicate_rejected() {
    let controller = test_controller();
    let dump =
        crate::model::json::create_json_object(&minimal_tree(0x42), Flags::full()).unwrap();

    controller
        .import_entity_model(&dump, Flags::full())
        .await
        .unwrap();
    assert_eq!(
        controller.import_entity_model(&dump, Flags::full()).await,
        Err(DeserializationError::DuplicateEntityId)
    );
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dump_unknown_entity() {
    let controller = test_controller();
    assert_eq!(
        controller
            .dump_entity_model(UniqueIdentifier::new(0x99), Flags::full())
            .unwrap_err(),
        SerializationError::UnknownEntity
    );
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent() {
    let controller = test_controller();
    controller.shutdown().await;
    controller.shutdown().await;

    // Commands after shutdown fail cleanly
    assert_eq!(
        controller
            .set_entity_name(UniqueIdentifier::new(0x1), "X")
            .await,
        Err(AemError::UnknownEntity)
    );
}

#[tokio::test(start_paused = true)]
async fn test_advertising_duplicate_prog_id() {
    // A simulated entity whose id collides with the controller's derived id
    let (interface, link) = VirtualInterface::pair(MacAddress::new([2, 0, 0, 0, 0, 1]));
    let controller = Controller::with_interface(
        Box::new(interface),
        0x0001,
        UniqueIdentifier::new(0x0011_2233_0000_0001),
        ControllerConfig::default(),
    );
    let mut events = controller.subscribe();

    let sim = std::sync::Arc::new(std::sync::Mutex::new(EntitySim::new(EntitySimConfig::new(
        controller.controller_id(),
    ))));
    let injector = link.injector();
    let _responder = crate::testing::spawn_responder(link, sim.clone());

    let advertisement = sim.lock().unwrap().advertisement();
    injector.inject(advertisement).await.unwrap();
    // Wait until the colliding entity finished enumeration
    loop {
        if let Ok(ControllerEvent::EntityOnline { .. }) = events.recv().await {
            break;
        }
    }

    assert!(matches!(
        controller.enable_advertising().await,
        Err(ControllerError::DuplicateProgId { .. })
    ));
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_advertising_toggle() {
    let controller = test_controller();
    controller.enable_advertising().await.unwrap();
    controller.disable_advertising().await;
    controller.shutdown().await;
}
