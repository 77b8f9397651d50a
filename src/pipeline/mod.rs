//! Per-entity AECP/ACMP command pipeline.
//!
//! Sans-IO: submission and response handling return the frames to put on
//! the wire; the caller owns the socket and the clock. AECP is strictly
//! serial per target entity (one in-flight command, FIFO queue behind it);
//! ACMP is multiplexed on sequence id. Completions are delivered through
//! oneshot channels, per target in submission order.

#[cfg(test)]
mod tests;

use crate::error::{AcmpError, AemError};
use crate::protocol::{
    self, AcmpMessageType, Acmpdu, AecpMessageType, AemCommandType, AemStatusCode, Aecpdu,
};
use crate::types::{MacAddress, StreamIdentification, UniqueIdentifier};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A received AECP response, before payload interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct AecpResponse {
    /// Wire status code
    pub status: AemStatusCode,
    /// Response payload
    pub payload: Bytes,
}

impl AecpResponse {
    /// Map a non-success wire status to its error
    pub fn check(&self) -> Result<(), AemError> {
        match self.status.to_error() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

pub(crate) type AecpReply = oneshot::Sender<Result<AecpResponse, AemError>>;
pub(crate) type AcmpReply = oneshot::Sender<Result<Acmpdu, AcmpError>>;

struct QueuedAecp {
    command_type: AemCommandType,
    payload: Bytes,
    reply: AecpReply,
}

struct AecpInFlight {
    frame: Bytes,
    sequence_id: u16,
    command_type: AemCommandType,
    deadline: Instant,
    retries_left: u8,
    reply: AecpReply,
}

struct AecpTarget {
    mac: MacAddress,
    next_sequence: u16,
    inflight: Option<AecpInFlight>,
    queue: VecDeque<QueuedAecp>,
}

struct AcmpInFlight {
    frame: Bytes,
    expected_response: AcmpMessageType,
    responder: UniqueIdentifier,
    deadline: Instant,
    retries_left: u8,
    reply: AcmpReply,
}

/// The command pipeline state machine
pub(crate) struct CommandPipeline {
    controller_id: UniqueIdentifier,
    local_mac: MacAddress,
    timeout: Duration,
    retries: u8,
    aecp_targets: HashMap<UniqueIdentifier, AecpTarget>,
    acmp_next_sequence: u16,
    acmp_inflight: HashMap<u16, AcmpInFlight>,
}

impl CommandPipeline {
    pub(crate) fn new(
        controller_id: UniqueIdentifier,
        local_mac: MacAddress,
        timeout: Duration,
        retries: u8,
    ) -> Self {
        Self {
            controller_id,
            local_mac,
            timeout,
            retries,
            aecp_targets: HashMap::new(),
            acmp_next_sequence: 0,
            acmp_inflight: HashMap::new(),
        }
    }

    /// Queue an AECP command. Returns the frame to transmit if the target
    /// had no command in flight.
    pub(crate) fn submit_aecp(
        &mut self,
        target: UniqueIdentifier,
        target_mac: MacAddress,
        command_type: AemCommandType,
        payload: Bytes,
        reply: AecpReply,
        now: Instant,
    ) -> Option<Bytes> {
        let entry = self.aecp_targets.entry(target).or_insert_with(|| AecpTarget {
            mac: target_mac,
            next_sequence: 0,
            inflight: None,
            queue: VecDeque::new(),
        });
        entry.mac = target_mac;

        if entry.inflight.is_some() {
            entry.queue.push_back(QueuedAecp {
                command_type,
                payload,
                reply,
            });
            return None;
        }

        Some(Self::start_aecp(
            self.controller_id,
            self.local_mac,
            self.timeout,
            self.retries,
            target,
            entry,
            command_type,
            payload,
            reply,
            now,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn start_aecp(
        controller_id: UniqueIdentifier,
        local_mac: MacAddress,
        timeout: Duration,
        retries: u8,
        target: UniqueIdentifier,
        entry: &mut AecpTarget,
        command_type: AemCommandType,
        payload: Bytes,
        reply: AecpReply,
        now: Instant,
    ) -> Bytes {
        let sequence_id = entry.next_sequence;
        entry.next_sequence = entry.next_sequence.wrapping_add(1);

        let pdu = Aecpdu::command(target, controller_id, sequence_id, command_type, payload);
        let frame = protocol::ethernet_frame(entry.mac, local_mac, &pdu.encode());

        tracing::trace!(
            target: "avdecc::controller_state_machine",
            entity = %target,
            seq = sequence_id,
            command = ?command_type,
            "aecp command out"
        );

        entry.inflight = Some(AecpInFlight {
            frame: frame.clone(),
            sequence_id,
            command_type,
            deadline: now + timeout,
            retries_left: retries,
            reply,
        });
        frame
    }

    /// Handle a received AECP response. Returns the next queued frame for
    /// that target, if its in-flight slot was freed.
    pub(crate) fn handle_aecp(&mut self, pdu: &Aecpdu, now: Instant) -> Option<Bytes> {
        if pdu.message_type != AecpMessageType::AemResponse
            || pdu.controller_entity_id != self.controller_id
            || pdu.unsolicited
        {
            return None;
        }

        let entry = self.aecp_targets.get_mut(&pdu.target_entity_id)?;
        let matches = entry
            .inflight
            .as_ref()
            .is_some_and(|inflight| {
                inflight.sequence_id == pdu.sequence_id
                    && inflight.command_type == pdu.command_type
            });
        if !matches {
            tracing::debug!(
                target: "avdecc::controller_state_machine",
                entity = %pdu.target_entity_id,
                seq = pdu.sequence_id,
                "dropping response with no matching in-flight command"
            );
            return None;
        }

        let inflight = entry.inflight.take().expect("matched above");
        let _ = inflight.reply.send(Ok(AecpResponse {
            status: pdu.status,
            payload: pdu.payload.clone(),
        }));

        self.advance_aecp_queue(pdu.target_entity_id, now)
    }

    fn advance_aecp_queue(&mut self, target: UniqueIdentifier, now: Instant) -> Option<Bytes> {
        let controller_id = self.controller_id;
        let local_mac = self.local_mac;
        let timeout = self.timeout;
        let retries = self.retries;
        let entry = self.aecp_targets.get_mut(&target)?;
        let next = entry.queue.pop_front()?;
        Some(Self::start_aecp(
            controller_id,
            local_mac,
            timeout,
            retries,
            target,
            entry,
            next.command_type,
            next.payload,
            next.reply,
            now,
        ))
    }

    /// Send an ACMP command. Always transmits immediately (multiplexed).
    pub(crate) fn submit_acmp(
        &mut self,
        message_type: AcmpMessageType,
        talker: StreamIdentification,
        listener: StreamIdentification,
        reply: AcmpReply,
        now: Instant,
    ) -> Bytes {
        let sequence_id = self.acmp_next_sequence;
        self.acmp_next_sequence = self.acmp_next_sequence.wrapping_add(1);

        let pdu = Acmpdu::command(
            message_type,
            self.controller_id,
            talker.entity_id,
            talker.stream_index,
            listener.entity_id,
            listener.stream_index,
            sequence_id,
        );
        let frame = protocol::ethernet_frame(
            MacAddress::IDENTIFICATION_MULTICAST,
            self.local_mac,
            &pdu.encode(),
        );

        tracing::trace!(
            target: "avdecc::controller_state_machine",
            seq = sequence_id,
            command = ?message_type,
            listener = %listener.entity_id,
            "acmp command out"
        );

        let responder = match message_type {
            AcmpMessageType::DisconnectTxCommand
            | AcmpMessageType::GetTxStateCommand
            | AcmpMessageType::GetTxConnectionCommand
            | AcmpMessageType::ConnectTxCommand => talker.entity_id,
            _ => listener.entity_id,
        };

        self.acmp_inflight.insert(
            sequence_id,
            AcmpInFlight {
                frame: frame.clone(),
                expected_response: message_type
                    .response_type()
                    .unwrap_or(AcmpMessageType::ConnectRxResponse),
                responder,
                deadline: now + self.timeout,
                retries_left: self.retries,
                reply,
            },
        );
        frame
    }

    /// Handle a received ACMP response
    pub(crate) fn handle_acmp(&mut self, pdu: &Acmpdu) {
        if !pdu.message_type.is_response() || pdu.controller_entity_id != self.controller_id {
            return;
        }
        let matches = self
            .acmp_inflight
            .get(&pdu.sequence_id)
            .is_some_and(|inflight| inflight.expected_response == pdu.message_type);
        if !matches {
            return;
        }
        let inflight = self
            .acmp_inflight
            .remove(&pdu.sequence_id)
            .expect("matched above");
        let _ = inflight.reply.send(Ok(pdu.clone()));
    }

    /// Drive deadlines: returns retransmissions and newly-started frames,
    /// completing timed-out commands along the way.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Bytes> {
        let mut frames = Vec::new();

        let targets: Vec<UniqueIdentifier> = self
            .aecp_targets
            .iter()
            .filter(|(_, t)| t.inflight.as_ref().is_some_and(|i| i.deadline <= now))
            .map(|(&id, _)| id)
            .collect();
        for target in targets {
            let timeout = self.timeout;
            let entry = self.aecp_targets.get_mut(&target).expect("listed above");
            let inflight = entry.inflight.as_mut().expect("listed above");
            if inflight.retries_left > 0 {
                inflight.retries_left -= 1;
                inflight.deadline = now + timeout;
                frames.push(inflight.frame.clone());
                tracing::debug!(
                    target: "avdecc::controller_state_machine",
                    entity = %target,
                    seq = inflight.sequence_id,
                    "aecp command retransmitted"
                );
            } else {
                let inflight = entry.inflight.take().expect("listed above");
                tracing::debug!(
                    target: "avdecc::controller_state_machine",
                    entity = %target,
                    seq = inflight.sequence_id,
                    "aecp command timed out"
                );
                let _ = inflight.reply.send(Err(AemError::TimedOut));
                if let Some(frame) = self.advance_aecp_queue(target, now) {
                    frames.push(frame);
                }
            }
        }

        let expired: Vec<u16> = self
            .acmp_inflight
            .iter()
            .filter(|(_, i)| i.deadline <= now)
            .map(|(&seq, _)| seq)
            .collect();
        for sequence_id in expired {
            let timeout = self.timeout;
            let inflight = self.acmp_inflight.get_mut(&sequence_id).expect("listed above");
            if inflight.retries_left > 0 {
                inflight.retries_left -= 1;
                inflight.deadline = now + timeout;
                frames.push(inflight.frame.clone());
            } else {
                let inflight = self
                    .acmp_inflight
                    .remove(&sequence_id)
                    .expect("listed above");
                let _ = inflight.reply.send(Err(AcmpError::TimedOut));
            }
        }

        frames
    }

    /// Earliest pending deadline, if any command is in flight
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let aecp = self
            .aecp_targets
            .values()
            .filter_map(|t| t.inflight.as_ref().map(|i| i.deadline));
        let acmp = self.acmp_inflight.values().map(|i| i.deadline);
        aecp.chain(acmp).min()
    }

    /// Complete every command addressed to a removed entity with
    /// `UnknownEntity` and drop its queue.
    pub(crate) fn fail_entity(&mut self, entity_id: UniqueIdentifier) {
        if let Some(target) = self.aecp_targets.remove(&entity_id) {
            if let Some(inflight) = target.inflight {
                let _ = inflight.reply.send(Err(AemError::UnknownEntity));
            }
            for queued in target.queue {
                let _ = queued.reply.send(Err(AemError::UnknownEntity));
            }
        }

        let affected: Vec<u16> = self
            .acmp_inflight
            .iter()
            .filter(|(_, i)| i.responder == entity_id)
            .map(|(&seq, _)| seq)
            .collect();
        for sequence_id in affected {
            let inflight = self.acmp_inflight.remove(&sequence_id).expect("listed above");
            let _ = inflight.reply.send(Err(AcmpError::UnknownEntity));
        }
    }

    /// Complete every outstanding command with `Aborted` (shutdown)
    pub(crate) fn abort_all(&mut self) {
        for (_, target) in self.aecp_targets.drain() {
            if let Some(inflight) = target.inflight {
                let _ = inflight.reply.send(Err(AemError::Aborted));
            }
            for queued in target.queue {
                let _ = queued.reply.send(Err(AemError::Aborted));
            }
        }
        for (_, inflight) in self.acmp_inflight.drain() {
            let _ = inflight.reply.send(Err(AcmpError::Aborted));
        }
    }
}
