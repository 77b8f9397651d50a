use super::*;
use crate::error::{AcmpError, AemError};
use crate::types::{EntityCapabilities, MacAddress, StreamFormat, UniqueIdentifier};
use bytes::{BufMut, BytesMut};
use proptest::prelude::*;

fn sample_adpdu() -> Adpdu {
    Adpdu {
        message_type: AdpMessageType::EntityAvailable,
        valid_time: 62,
        entity_id: UniqueIdentifier::new(0x0011_2233_4455_6677),
        entity_model_id: UniqueIdentifier::new(0x0011_2233_0000_0001),
        entity_capabilities: EntityCapabilities(EntityCapabilities::AEM_SUPPORTED),
        talker_stream_sources: 2,
        talker_capabilities: 0x4001,
        listener_stream_sinks: 4,
        listener_capabilities: 0x4001,
        controller_capabilities: 0,
        available_index: 7,
        gptp_grandmaster_id: UniqueIdentifier::new(0x0011_2233_4455_6600),
        gptp_domain_number: 0,
        identify_control_index: 0,
        interface_index: 0,
        association_id: UniqueIdentifier::NULL,
    }
}

#[test]
fn test_adpdu_wire_layout() {
    let encoded = sample_adpdu().encode();

    // cd=1, subtype 0x7A
    assert_eq!(encoded[0], 0xFA);
    // sv=1, version 0, message_type ENTITY_AVAILABLE
    assert_eq!(encoded[1], 0x80);
    // valid_time 62s -> 31 two-second units in the upper 5 bits, cdl 56
    assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), (31 << 11) | 56);
    // entity id straight after the header word
    assert_eq!(
        u64::from_be_bytes(encoded[4..12].try_into().unwrap()),
        0x0011_2233_4455_6677
    );
    // total size: control header + control data
    assert_eq!(encoded.len(), 12 + 56);
}

#[test]
fn test_adpdu_roundtrip_through_frame() {
    let pdu = sample_adpdu();
    let frame = ethernet_frame(
        MacAddress::IDENTIFICATION_MULTICAST,
        MacAddress::new([2, 0, 0, 0, 0, 1]),
        &pdu.encode(),
    );
    let received = parse_frame(&frame).expect("frame should parse");
    assert_eq!(received.dst_mac, MacAddress::IDENTIFICATION_MULTICAST);
    match received.pdu {
        Pdu::Adp(decoded) => assert_eq!(decoded, pdu),
        other => panic!("expected ADP, got {other:?}"),
    }
}

#[test]
fn test_non_avtp_frames_rejected() {
    let mut frame = ethernet_frame(
        MacAddress::new([1; 6]),
        MacAddress::new([2; 6]),
        &sample_adpdu().encode(),
    )
    .to_vec();
    frame[12] = 0x08; // IPv4 ethertype
    frame[13] = 0x00;
    assert!(parse_frame(&frame).is_none());
}

#[test]
fn test_truncated_frame_rejected() {
    let frame = ethernet_frame(
        MacAddress::new([1; 6]),
        MacAddress::new([2; 6]),
        &sample_adpdu().encode(),
    );
    assert!(parse_frame(&frame[..20]).is_none());
}

#[test]
fn test_aecpdu_roundtrip() {
    let pdu = Aecpdu::command(
        UniqueIdentifier::new(0x1111_1111_1111_1111),
        UniqueIdentifier::new(0x2222_2222_2222_2222),
        0x00AB,
        AemCommandType::ReadDescriptor,
        aem::read_descriptor(0, 0x0000, 0),
    );
    let frame = ethernet_frame(
        MacAddress::new([1; 6]),
        MacAddress::new([2; 6]),
        &pdu.encode(),
    );
    let received = parse_frame(&frame).unwrap();
    match received.pdu {
        Pdu::Aecp(decoded) => {
            assert_eq!(decoded.sequence_id, 0x00AB);
            assert_eq!(decoded.command_type, AemCommandType::ReadDescriptor);
            assert_eq!(decoded.target_entity_id.value(), 0x1111_1111_1111_1111);
            assert_eq!(decoded, pdu);
        }
        other => panic!("expected AECP, got {other:?}"),
    }
}

#[test]
fn test_aecp_unsolicited_bit() {
    let mut pdu = Aecpdu::command(
        UniqueIdentifier::new(1),
        UniqueIdentifier::new(2),
        7,
        AemCommandType::SetName,
        bytes::Bytes::new(),
    );
    pdu.message_type = AecpMessageType::AemResponse;
    pdu.unsolicited = true;
    let encoded = pdu.encode();
    // u bit leads the command_type word
    assert_eq!(encoded[22] & 0x80, 0x80);

    let frame = ethernet_frame(MacAddress::new([1; 6]), MacAddress::new([2; 6]), &encoded);
    match parse_frame(&frame).unwrap().pdu {
        Pdu::Aecp(decoded) => assert!(decoded.unsolicited),
        other => panic!("expected AECP, got {other:?}"),
    }
}

#[test]
fn test_acmpdu_roundtrip() {
    let mut pdu = Acmpdu::command(
        AcmpMessageType::ConnectRxCommand,
        UniqueIdentifier::new(0x3333_3333_3333_3333),
        UniqueIdentifier::new(0x4444_4444_4444_4444),
        1,
        UniqueIdentifier::new(0x5555_5555_5555_5555),
        2,
        0x0042,
    );
    pdu.stream_dest_mac = MacAddress::new([0x91, 0xE0, 0xF0, 0x00, 0x12, 0x34]);
    let frame = ethernet_frame(
        MacAddress::IDENTIFICATION_MULTICAST,
        MacAddress::new([2; 6]),
        &pdu.encode(),
    );
    match parse_frame(&frame).unwrap().pdu {
        Pdu::Acmp(decoded) => assert_eq!(decoded, pdu),
        other => panic!("expected ACMP, got {other:?}"),
    }
}

#[test]
fn test_acmp_response_type_mapping() {
    assert_eq!(
        AcmpMessageType::ConnectRxCommand.response_type(),
        Some(AcmpMessageType::ConnectRxResponse)
    );
    assert_eq!(
        AcmpMessageType::GetRxStateCommand.response_type(),
        Some(AcmpMessageType::GetRxStateResponse)
    );
    assert_eq!(AcmpMessageType::ConnectRxResponse.response_type(), None);
    assert!(AcmpMessageType::GetRxStateResponse.is_response());
    assert!(!AcmpMessageType::GetRxStateCommand.is_response());
}

#[test]
fn test_aem_status_mapping() {
    assert!(AemStatusCode::SUCCESS.to_error().is_none());
    assert_eq!(
        AemStatusCode::NOT_IMPLEMENTED.to_error(),
        Some(AemError::NotImplemented)
    );
    assert_eq!(
        AemStatusCode::ENTITY_ACQUIRED.to_error(),
        Some(AemError::AcquiredByOther {
            owner: UniqueIdentifier::NULL
        })
    );
    assert_eq!(
        AemStatusCode::STREAM_IS_RUNNING.to_error(),
        Some(AemError::StreamIsRunning)
    );
}

#[test]
fn test_acmp_status_mapping() {
    assert!(AcmpStatusCode::SUCCESS.to_error().is_none());
    assert_eq!(
        AcmpStatusCode::NOT_CONNECTED.to_error(),
        Some(AcmpError::NotConnected)
    );
    assert_eq!(
        AcmpStatusCode::COULD_NOT_SEND_MESSAGE.to_error(),
        Some(AcmpError::CouldNotSendMessage)
    );
    assert_eq!(
        AcmpStatusCode::NOT_SUPPORTED.to_error(),
        Some(AcmpError::NotSupported)
    );
}

#[test]
fn test_name_payload_roundtrip() {
    let name = crate::types::AvdeccFixedString::new("Stage Box");
    let payload = aem::name(0x0005, 3, 0, 1, &name);
    assert_eq!(payload.len(), 8 + 64);
    let decoded = aem::decode_name_response(&payload).unwrap();
    assert_eq!(decoded, name);
}

#[test]
fn test_audio_map_payload_roundtrip() {
    use crate::types::AudioMapping;
    let maps = vec![
        AudioMapping {
            stream_index: 0,
            stream_channel: 0,
            cluster_offset: 0,
            cluster_channel: 0,
        },
        AudioMapping {
            stream_index: 0,
            stream_channel: 1,
            cluster_offset: 1,
            cluster_channel: 0,
        },
    ];
    let payload = aem::audio_mappings(0x000E, 0, &maps);
    assert_eq!(payload.len(), 8 + 16);
}

#[test]
fn test_entity_descriptor_roundtrip() {
    use crate::model::EntityDescriptor;
    let descriptor = EntityDescriptor {
        identity: crate::model::Identity {
            entity_id: UniqueIdentifier::new(0x0011_2233_4455_6677),
            entity_model_id: UniqueIdentifier::new(1),
            entity_capabilities: EntityCapabilities(8),
            talker_stream_sources: 1,
            talker_capabilities: 0x4001,
            listener_stream_sinks: 1,
            listener_capabilities: 0x4001,
            controller_capabilities: 0,
            available_index: 3,
        },
        association_id: UniqueIdentifier::NULL,
        entity_name: "Unit".into(),
        vendor_name_string: 0,
        model_name_string: 1,
        firmware_version: "1.0.0".into(),
        group_name: "".into(),
        serial_number: "SN-1".into(),
        configurations_count: 1,
        current_configuration: 0,
    };

    let mut body = BytesMut::new();
    body.put_u16(0); // configuration_index
    body.put_u16(0); // reserved
    body.put_u16(0x0000); // descriptor_type
    body.put_u16(0); // descriptor_index
    aem::encode_entity(&mut body, &descriptor);

    let response = aem::decode_read_descriptor_response(&body).unwrap();
    match response.descriptor {
        aem::Descriptor::Entity(decoded) => assert_eq!(decoded, descriptor),
        other => panic!("expected entity descriptor, got {other:?}"),
    }
}

#[test]
fn test_stream_descriptor_roundtrip() {
    use crate::model::StreamDescriptor;
    let descriptor = StreamDescriptor {
        object_name: "Input 1".into(),
        localized_description: 0xFFFF,
        clock_domain_index: 0,
        stream_flags: 0x0003,
        current_format: StreamFormat(0x00A0_0204_6000_0800),
        avb_interface_index: 0,
        buffer_length: 583_333,
        formats: vec![
            StreamFormat(0x00A0_0204_6000_0800),
            StreamFormat(0x00A0_0204_6000_1000),
        ],
    };

    let mut body = BytesMut::new();
    body.put_u16(0);
    body.put_u16(0);
    body.put_u16(0x0005); // STREAM_INPUT
    body.put_u16(0);
    aem::encode_stream(&mut body, &descriptor);

    let response = aem::decode_read_descriptor_response(&body).unwrap();
    match response.descriptor {
        aem::Descriptor::Stream(decoded) => assert_eq!(decoded, descriptor),
        other => panic!("expected stream descriptor, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_adpdu_roundtrip(
        entity_id in any::<u64>(),
        model_id in any::<u64>(),
        available_index in any::<u32>(),
        sources in any::<u16>(),
        sinks in any::<u16>(),
        valid_time in 1u8..=62,
    ) {
        let pdu = Adpdu {
            entity_id: UniqueIdentifier::new(entity_id),
            entity_model_id: UniqueIdentifier::new(model_id),
            available_index,
            talker_stream_sources: sources,
            listener_stream_sinks: sinks,
            valid_time,
            ..sample_adpdu()
        };
        let frame = ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            MacAddress::new([2, 0, 0, 0, 0, 1]),
            &pdu.encode(),
        );
        let received = parse_frame(&frame).unwrap();
        match received.pdu {
            Pdu::Adp(decoded) => {
                prop_assert_eq!(decoded.entity_id.value(), entity_id);
                prop_assert_eq!(decoded.available_index, available_index);
                // valid_time survives modulo the 2-second wire granularity
                prop_assert_eq!(decoded.valid_time, (valid_time / 2) * 2);
            }
            other => prop_assert!(false, "expected ADP, got {:?}", other),
        }
    }

    #[test]
    fn prop_acmpdu_roundtrip(
        talker in any::<u64>(),
        listener in any::<u64>(),
        talker_uid in any::<u16>(),
        listener_uid in any::<u16>(),
        seq in any::<u16>(),
        count in any::<u16>(),
    ) {
        let mut pdu = Acmpdu::command(
            AcmpMessageType::GetRxStateResponse,
            UniqueIdentifier::new(1),
            UniqueIdentifier::new(talker),
            talker_uid,
            UniqueIdentifier::new(listener),
            listener_uid,
            seq,
        );
        pdu.connection_count = count;
        let frame = ethernet_frame(
            MacAddress::new([1; 6]),
            MacAddress::new([2; 6]),
            &pdu.encode(),
        );
        match parse_frame(&frame).unwrap().pdu {
            Pdu::Acmp(decoded) => prop_assert_eq!(decoded, pdu),
            other => prop_assert!(false, "expected ACMP, got {:?}", other),
        }
    }
}
