use super::*;
use crate::protocol::{parse_frame, Pdu};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

const TARGET: UniqueIdentifier = UniqueIdentifier::new(0x0011_2233_4455_6677);
const CONTROLLER: UniqueIdentifier = UniqueIdentifier::new(0x0001_0203_0405_0607);

fn pipeline() -> CommandPipeline {
    CommandPipeline::new(
        CONTROLLER,
        MacAddress::new([2, 0, 0, 0, 0, 1]),
        Duration::from_millis(250),
        1,
    )
}

fn target_mac() -> MacAddress {
    MacAddress::new([2, 0, 0, 0, 0, 9])
}

fn decode_aecp(frame: &Bytes) -> Aecpdu {
    match parse_frame(frame).expect("frame should parse").pdu {
        Pdu::Aecp(pdu) => pdu,
        other => panic!("expected AECP, got {other:?}"),
    }
}

fn response_for(command: &Aecpdu, status: AemStatusCode) -> Aecpdu {
    let mut response = command.clone();
    response.message_type = AecpMessageType::AemResponse;
    response.status = status;
    response
}

#[tokio::test]
async fn test_aecp_serial_per_target() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();

    let first = p
        .submit_aecp(TARGET, target_mac(), AemCommandType::GetConfiguration, Bytes::new(), tx1, now)
        .expect("first command transmits immediately");
    // Second command queues behind the first
    assert!(p
        .submit_aecp(TARGET, target_mac(), AemCommandType::GetName, Bytes::new(), tx2, now)
        .is_none());

    // Completing the first starts the second
    let next = p
        .handle_aecp(&response_for(&decode_aecp(&first), AemStatusCode::SUCCESS), now)
        .expect("queued command starts");
    let second = decode_aecp(&next);
    assert_eq!(second.command_type, AemCommandType::GetName);
    assert_eq!(second.sequence_id, 1);

    assert!(rx1.await.unwrap().is_ok());
    p.handle_aecp(&response_for(&second, AemStatusCode::SUCCESS), now);
    assert!(rx2.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_aecp_completion_order_is_submission_order() {
    let mut p = pipeline();
    let now = Instant::now();

    let mut receivers = Vec::new();
    let mut first_frame = None;
    for _ in 0..5 {
        let (tx, rx) = oneshot::channel();
        let frame = p.submit_aecp(
            TARGET,
            target_mac(),
            AemCommandType::GetConfiguration,
            Bytes::new(),
            tx,
            now,
        );
        if let Some(frame) = frame {
            first_frame = Some(frame);
        }
        receivers.push(rx);
    }

    // Walk the queue to completion, recording sequence ids as they go out
    let mut frame = first_frame.unwrap();
    let mut sequences = Vec::new();
    loop {
        let command = decode_aecp(&frame);
        sequences.push(command.sequence_id);
        match p.handle_aecp(&response_for(&command, AemStatusCode::SUCCESS), now) {
            Some(next) => frame = next,
            None => break,
        }
    }
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

    // All five completions resolved, in order
    for rx in receivers {
        assert!(rx.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_aecp_retry_uses_same_sequence_id() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx, rx) = oneshot::channel();
    let frame = p
        .submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx, now)
        .unwrap();
    let original = decode_aecp(&frame);

    // First deadline: retransmission with the same sequence id
    let resent = p.expire(now + Duration::from_millis(251));
    assert_eq!(resent.len(), 1);
    assert_eq!(decode_aecp(&resent[0]).sequence_id, original.sequence_id);

    // Response to the retransmission completes normally
    p.handle_aecp(
        &response_for(&original, AemStatusCode::SUCCESS),
        now + Duration::from_millis(300),
    );
    assert!(rx.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_aecp_timeout_after_retry_exhaustion() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx, rx) = oneshot::channel();
    p.submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx, now)
        .unwrap();

    assert_eq!(p.expire(now + Duration::from_millis(251)).len(), 1); // retry
    assert!(p.expire(now + Duration::from_millis(502)).is_empty()); // give up

    assert_eq!(rx.await.unwrap(), Err(AemError::TimedOut));
}

#[tokio::test]
async fn test_aecp_timeout_advances_queue() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx1, rx1) = oneshot::channel();
    let (tx2, _rx2) = oneshot::channel();
    p.submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx1, now)
        .unwrap();
    assert!(p
        .submit_aecp(TARGET, target_mac(), AemCommandType::GetName, Bytes::new(), tx2, now)
        .is_none());

    p.expire(now + Duration::from_millis(251)); // retry of first
    let frames = p.expire(now + Duration::from_millis(502)); // first dies, second starts
    assert_eq!(frames.len(), 1);
    assert_eq!(decode_aecp(&frames[0]).command_type, AemCommandType::GetName);
    assert_eq!(rx1.await.unwrap(), Err(AemError::TimedOut));
}

#[tokio::test]
async fn test_mismatched_response_ignored() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx, mut rx) = oneshot::channel();
    let frame = p
        .submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx, now)
        .unwrap();
    let command = decode_aecp(&frame);

    // Wrong sequence id: dropped
    let mut stale = response_for(&command, AemStatusCode::SUCCESS);
    stale.sequence_id = command.sequence_id.wrapping_add(7);
    assert!(p.handle_aecp(&stale, now).is_none());
    assert!(rx.try_recv().is_err());

    // Wrong controller id: dropped
    let mut foreign = response_for(&command, AemStatusCode::SUCCESS);
    foreign.controller_entity_id = UniqueIdentifier::new(0xDEAD);
    assert!(p.handle_aecp(&foreign, now).is_none());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_fail_entity_completes_all_with_unknown_entity() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    let _ = p.submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx1, now);
    let _ = p.submit_aecp(TARGET, target_mac(), AemCommandType::GetName, Bytes::new(), tx2, now);

    let (acmp_tx, acmp_rx) = oneshot::channel();
    let _ = p.submit_acmp(
        AcmpMessageType::GetRxStateCommand,
        StreamIdentification {
            entity_id: UniqueIdentifier::NULL,
            stream_index: 0,
        },
        StreamIdentification {
            entity_id: TARGET,
            stream_index: 0,
        },
        acmp_tx,
        now,
    );

    p.fail_entity(TARGET);
    assert_eq!(rx1.await.unwrap(), Err(AemError::UnknownEntity));
    assert_eq!(rx2.await.unwrap(), Err(AemError::UnknownEntity));
    assert_eq!(acmp_rx.await.unwrap().unwrap_err(), AcmpError::UnknownEntity);
}

#[tokio::test]
async fn test_acmp_multiplexing_and_matching() {
    let mut p = pipeline();
    let now = Instant::now();

    let listener = StreamIdentification {
        entity_id: TARGET,
        stream_index: 2,
    };
    let talker = StreamIdentification {
        entity_id: UniqueIdentifier::new(0x9999_9999_9999_9999),
        stream_index: 1,
    };

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    let f1 = p.submit_acmp(AcmpMessageType::ConnectRxCommand, talker, listener, tx1, now);
    let f2 = p.submit_acmp(AcmpMessageType::GetRxStateCommand, talker, listener, tx2, now);

    let c1 = match parse_frame(&f1).unwrap().pdu {
        Pdu::Acmp(pdu) => pdu,
        other => panic!("expected ACMP, got {other:?}"),
    };
    let c2 = match parse_frame(&f2).unwrap().pdu {
        Pdu::Acmp(pdu) => pdu,
        other => panic!("expected ACMP, got {other:?}"),
    };
    assert_ne!(c1.sequence_id, c2.sequence_id);

    // Answer in reverse order: both complete independently
    let mut r2 = c2.clone();
    r2.message_type = AcmpMessageType::GetRxStateResponse;
    r2.connection_count = 1;
    p.handle_acmp(&r2);

    let mut r1 = c1.clone();
    r1.message_type = AcmpMessageType::ConnectRxResponse;
    p.handle_acmp(&r1);

    assert_eq!(rx2.await.unwrap().unwrap().connection_count, 1);
    assert!(rx1.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_acmp_timeout() {
    let mut p = pipeline();
    let now = Instant::now();

    let id = StreamIdentification {
        entity_id: TARGET,
        stream_index: 0,
    };
    let (tx, rx) = oneshot::channel();
    let _ = p.submit_acmp(AcmpMessageType::ConnectRxCommand, id, id, tx, now);

    assert_eq!(p.expire(now + Duration::from_millis(251)).len(), 1);
    assert!(p.expire(now + Duration::from_millis(502)).is_empty());
    assert_eq!(rx.await.unwrap().unwrap_err(), AcmpError::TimedOut);
}

#[tokio::test]
async fn test_abort_all() {
    let mut p = pipeline();
    let now = Instant::now();

    let (tx, rx) = oneshot::channel();
    let _ = p.submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx, now);
    p.abort_all();
    assert_eq!(rx.await.unwrap(), Err(AemError::Aborted));
    assert!(p.next_deadline().is_none());
}

#[test]
fn test_next_deadline_tracks_earliest() {
    let mut p = pipeline();
    let now = Instant::now();
    assert!(p.next_deadline().is_none());

    let (tx, _rx) = oneshot::channel();
    let _ = p.submit_aecp(TARGET, target_mac(), AemCommandType::SetName, Bytes::new(), tx, now);
    assert_eq!(p.next_deadline(), Some(now + Duration::from_millis(250)));
}
