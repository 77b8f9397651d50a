//! End-to-end controller scenarios driven through the virtual interface
//! and the simulated entity.

use avdecc::testing::{spawn_responder, EntitySim, EntitySimConfig, FrameInjector, VirtualInterface};
use avdecc::{
    AcmpError, AcquireState, AemError, Controller, ControllerConfig, ControllerEvent,
    DescriptorType, MacAddress, StreamIdentification, UniqueIdentifier,
};
use avdecc::protocol::{AcmpMessageType, AcmpStatusCode, AemCommandType};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const ENTITY_ID: UniqueIdentifier = UniqueIdentifier::new(0x0011_2233_4455_6677);

struct Harness {
    controller: Controller,
    sim: Arc<Mutex<EntitySim>>,
    injector: FrameInjector,
    events: broadcast::Receiver<ControllerEvent>,
}

fn start(sim_config: EntitySimConfig) -> Harness {
    let (interface, link) = VirtualInterface::pair(MacAddress::new([2, 0, 0, 0, 0, 1]));
    let controller = Controller::with_interface(
        Box::new(interface),
        0x0001,
        UniqueIdentifier::new(0x0011_2233_0000_0001),
        ControllerConfig::default(),
    );
    let events = controller.subscribe();
    let injector = link.injector();
    let sim = Arc::new(Mutex::new(EntitySim::new(sim_config)));
    let _responder = spawn_responder(link, sim.clone());
    Harness {
        controller,
        sim,
        injector,
        events,
    }
}

async fn wait_for<F>(events: &mut broadcast::Receiver<ControllerEvent>, mut pred: F) -> ControllerEvent
where
    F: FnMut(&ControllerEvent) -> bool,
{
    loop {
        match events.recv().await {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
        }
    }
}

async fn bring_online(harness: &mut Harness) {
    let advertisement = harness.sim.lock().unwrap().advertisement();
    harness.injector.inject(advertisement).await.unwrap();
    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOnline { entity_id } if *entity_id == ENTITY_ID)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn scenario_discover_enumerate_online() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    // Exactly one advertised entity, with the advertised flag set
    let entities = harness.controller.entities();
    assert_eq!(entities.len(), 1);
    let entity = harness.controller.entity(ENTITY_ID).expect("entity cached");
    assert!(entity.was_advertised());
    assert!(!entity.has_enumeration_error());

    // The minimal model came across: 1 configuration, 1 audio unit,
    // 1 stream input
    let tree = entity.tree();
    assert_eq!(tree.identity.entity_id, ENTITY_ID);
    let config = tree.current_configuration().expect("active configuration");
    assert_eq!(config.audio_units.len(), 1);
    assert_eq!(config.stream_inputs.len(), 1);
    assert_eq!(tree.dynamic.entity_name.as_str(), "Sim Entity");
    assert_eq!(
        tree.dynamic.names[&(DescriptorType::StreamInput, 0)].as_str(),
        "Input 0"
    );

    // Every dynamic key resolves against the static model
    assert!(tree.is_coherent());

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_acquire_already_owned() {
    let owner = UniqueIdentifier::new(0xAAAA_AAAA_AAAA_AAAA);
    let mut config = EntitySimConfig::new(ENTITY_ID);
    config.acquired_by = Some(owner);
    let mut harness = start(config);
    bring_online(&mut harness).await;

    let result = harness.controller.acquire_entity(ENTITY_ID, true).await;
    assert_eq!(result, Err(AemError::AcquiredByOther { owner }));

    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(entity.acquire_state(), AcquireState::AcquiredByOther);
    assert_eq!(entity.owning_controller(), owner);

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_set_name_timeout_retry() {
    let mut config = EntitySimConfig::new(ENTITY_ID);
    // First SET_NAME response is lost; the retransmission succeeds
    config.drop_responses.insert(AemCommandType::SetName, 1);
    let mut harness = start(config);
    bring_online(&mut harness).await;

    harness
        .controller
        .set_entity_name(ENTITY_ID, "Foo")
        .await
        .expect("retransmission completes the command");

    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(entity.tree().dynamic.entity_name.as_str(), "Foo");

    // Exactly two SET_NAME frames went out
    assert_eq!(
        harness.sim.lock().unwrap().command_counts[&AemCommandType::SetName],
        2
    );

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_disconnect_not_connected_normalised() {
    let mut config = EntitySimConfig::new(ENTITY_ID);
    config
        .acmp_status
        .insert(AcmpMessageType::DisconnectRxCommand, AcmpStatusCode::NOT_CONNECTED);
    let mut harness = start(config);
    bring_online(&mut harness).await;

    let talker = StreamIdentification {
        entity_id: UniqueIdentifier::new(0x9999_9999_9999_9999),
        stream_index: 0,
    };
    let listener = StreamIdentification {
        entity_id: ENTITY_ID,
        stream_index: 0,
    };
    // Disconnecting an already-disconnected stream is a success
    assert_eq!(
        harness.controller.disconnect_stream(talker, listener).await,
        Ok(())
    );

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_disconnect_recovery_via_rx_state() {
    let mut config = EntitySimConfig::new(ENTITY_ID);
    config.acmp_status.insert(
        AcmpMessageType::DisconnectRxCommand,
        AcmpStatusCode::COULD_NOT_SEND_MESSAGE,
    );
    // GET_RX_STATE is not overridden: it reports zero connections
    let mut harness = start(config);
    bring_online(&mut harness).await;

    let talker = StreamIdentification {
        entity_id: UniqueIdentifier::new(0x9999_9999_9999_9999),
        stream_index: 0,
    };
    let listener = StreamIdentification {
        entity_id: ENTITY_ID,
        stream_index: 0,
    };
    // The listener says nothing is connected, so the disconnect succeeded
    assert_eq!(
        harness.controller.disconnect_stream(talker, listener).await,
        Ok(())
    );

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_departure_purges_entity() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    let departing = harness.sim.lock().unwrap().departing();
    harness.injector.inject(departing).await.unwrap();
    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOffline { entity_id } if *entity_id == ENTITY_ID)
    })
    .await;

    assert!(harness.controller.entities().is_empty());
    assert!(harness.controller.entity(ENTITY_ID).is_none());

    // Anything submitted afterwards fails fast
    assert_eq!(
        harness.controller.set_entity_name(ENTITY_ID, "Gone").await,
        Err(AemError::UnknownEntity)
    );

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn acquire_success_updates_state_and_notifies() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    let owner = harness
        .controller
        .acquire_entity(ENTITY_ID, false)
        .await
        .expect("acquire succeeds");
    assert_eq!(owner, harness.controller.controller_id());

    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(entity.acquire_state(), AcquireState::Acquired);

    // The observer saw the transition, strictly before the caller did
    wait_for(&mut harness.events, |event| {
        matches!(
            event,
            ControllerEvent::AcquireStateChanged {
                state: AcquireState::Acquired,
                ..
            }
        )
    })
    .await;

    // Releasing drops back to NotAcquired
    harness.controller.release_entity(ENTITY_ID).await.unwrap();
    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(entity.acquire_state(), AcquireState::NotAcquired);

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn set_name_updates_cache_before_event_and_completion() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    harness
        .controller
        .set_entity_name(ENTITY_ID, "Renamed")
        .await
        .unwrap();

    // A subsequent read observes the new name
    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(entity.tree().dynamic.entity_name.as_str(), "Renamed");

    let event = wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityNameChanged { .. })
    })
    .await;
    if let ControllerEvent::EntityNameChanged { entity_id, name } = event {
        assert_eq!(entity_id, ENTITY_ID);
        assert_eq!(name.as_str(), "Renamed");
    }

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_stream_records_connection() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    let talker = StreamIdentification {
        entity_id: UniqueIdentifier::new(0x9999_9999_9999_9999),
        stream_index: 3,
    };
    let listener = StreamIdentification {
        entity_id: ENTITY_ID,
        stream_index: 0,
    };
    harness
        .controller
        .connect_stream(talker, listener)
        .await
        .expect("connect succeeds");

    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    let connection = entity.tree().dynamic.stream_input_connections[&0];
    assert_eq!(connection.talker, Some(talker));

    let event = wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::StreamConnectionChanged { .. })
    })
    .await;
    if let ControllerEvent::StreamConnectionChanged {
        listener: event_listener,
        talker: event_talker,
    } = event
    {
        assert_eq!(event_listener, listener);
        assert_eq!(event_talker, Some(talker));
    }

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn get_listener_stream_state_reports_connected_talker() {
    let talker = StreamIdentification {
        entity_id: UniqueIdentifier::new(0x7777_7777_7777_7777),
        stream_index: 1,
    };
    let mut config = EntitySimConfig::new(ENTITY_ID);
    config.connected_talker = Some(talker);
    let mut harness = start(config);
    bring_online(&mut harness).await;

    let listener = StreamIdentification {
        entity_id: ENTITY_ID,
        stream_index: 0,
    };
    let state = harness
        .controller
        .get_listener_stream_state(listener)
        .await
        .unwrap();
    assert_eq!(state.talker, Some(talker));
    assert_eq!(state.connection_count, 1);

    // Enumeration already recorded the connection from its RX-state probe
    let entity = harness.controller.entity(ENTITY_ID).unwrap();
    assert_eq!(
        entity.tree().dynamic.stream_input_connections[&0].talker,
        Some(talker)
    );

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restart_detection_purges_and_reenumerates() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));

    let advertisement = harness.sim.lock().unwrap().advertisement_with_index(100);
    harness.injector.inject(advertisement).await.unwrap();
    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOnline { .. })
    })
    .await;

    // available_index regressed: the remote restarted
    let advertisement = harness.sim.lock().unwrap().advertisement_with_index(2);
    harness.injector.inject(advertisement).await.unwrap();

    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOffline { .. })
    })
    .await;
    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOnline { .. })
    })
    .await;
    assert_eq!(harness.controller.entities().len(), 1);

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn liveness_expiry_removes_entity() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    // valid_time 31s decodes to 30s granularity; liveness is twice that.
    // No re-advertisement arrives, so the entity expires.
    tokio::time::sleep(Duration::from_secs(61)).await;

    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOffline { entity_id } if *entity_id == ENTITY_ID)
    })
    .await;
    assert!(harness.controller.entities().is_empty());

    harness.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_notifies_offline_for_advertised_entities() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    harness.controller.shutdown().await;

    wait_for(&mut harness.events, |event| {
        matches!(event, ControllerEvent::EntityOffline { entity_id } if *entity_id == ENTITY_ID)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn per_target_completions_keep_submission_order() {
    let mut harness = start(EntitySimConfig::new(ENTITY_ID));
    bring_online(&mut harness).await;

    // Submit a burst of commands concurrently; completions must land in
    // submission order even though they share one serial pipeline.
    let controller = harness.controller.clone();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut joins = Vec::new();
    for i in 0..5u32 {
        let controller = controller.clone();
        let order = order.clone();
        joins.push(tokio::spawn(async move {
            controller
                .set_entity_name(ENTITY_ID, &format!("Name {i}"))
                .await
                .unwrap();
            order.lock().unwrap().push(i);
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);

    harness.controller.shutdown().await;
}
