use crate::types::UniqueIdentifier;
use thiserror::Error;

/// Errors raised while constructing or configuring a controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The requested protocol interface kind is not compiled in or unknown
    #[error("invalid protocol interface type")]
    InvalidProtocolInterfaceType,

    /// The capture backend could not be opened
    #[error("interface open error: {message}")]
    InterfaceOpenError {
        /// Description of the failure
        message: String,
    },

    /// No network interface with the given name exists
    #[error("interface not found: {name}")]
    InterfaceNotFound {
        /// The requested interface name
        name: String,
    },

    /// The interface exists but cannot be used (down, no MAC, ...)
    #[error("interface invalid: {name}")]
    InterfaceInvalid {
        /// The requested interface name
        name: String,
    },

    /// The entity id derived from the program id is already in use on the
    /// local segment
    #[error("program id already in use (derived entity id {entity_id})")]
    DuplicateProgId {
        /// The conflicting derived entity id
        entity_id: UniqueIdentifier,
    },

    /// Internal library error
    #[error("internal error: {message}")]
    InternalError {
        /// Description of the error
        message: String,
    },
}

/// Failure status of an AECP (AEM) command.
///
/// A successful command is `Ok` at the API surface; this enum carries every
/// non-success outcome, both entity-reported AEM statuses and local
/// pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AemError {
    /// The entity does not implement the command
    #[error("not implemented")]
    NotImplemented,

    /// No descriptor at the given type/index
    #[error("no such descriptor")]
    NoSuchDescriptor,

    /// The entity is locked by another controller
    #[error("locked by another controller")]
    LockedByOther,

    /// The entity is acquired by another controller
    #[error("acquired by another controller ({owner})")]
    AcquiredByOther {
        /// The controller currently owning the entity
        owner: UniqueIdentifier,
    },

    /// The controller is not authenticated with the entity
    #[error("not authenticated")]
    NotAuthenticated,

    /// Authentication is disabled on the entity
    #[error("authentication disabled")]
    AuthenticationDisabled,

    /// One or more command fields were rejected
    #[error("bad arguments")]
    BadArguments,

    /// The entity cannot allocate the required resources
    #[error("no resources")]
    NoResources,

    /// The entity is still processing a previous command
    #[error("in progress")]
    InProgress,

    /// The entity returned an inconsistent response
    #[error("entity misbehaving")]
    EntityMisbehaving,

    /// The command is recognised but not supported in this context
    #[error("not supported")]
    NotSupported,

    /// The operation cannot proceed while the stream is running
    #[error("stream is running")]
    StreamIsRunning,

    /// A network-level failure prevented the exchange
    #[error("network error")]
    NetworkError,

    /// The response could not be decoded
    #[error("protocol error")]
    ProtocolError,

    /// No response before the deadline, retries exhausted
    #[error("timed out")]
    TimedOut,

    /// The target entity is not (or no longer) known to the controller
    #[error("unknown entity")]
    UnknownEntity,

    /// The command was cancelled by controller shutdown
    #[error("aborted")]
    Aborted,

    /// Internal library error
    #[error("internal error")]
    InternalError,
}

/// Failure status of an ACMP (connection management) command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcmpError {
    /// The listener entity id is unknown to the responder
    #[error("listener unknown id")]
    ListenerUnknownId,

    /// The talker entity id is unknown to the responder
    #[error("talker unknown id")]
    TalkerUnknownId,

    /// The talker could not allocate a destination MAC
    #[error("talker destination MAC failure")]
    TalkerDestMacFail,

    /// The talker has no such stream index
    #[error("talker has no such stream index")]
    TalkerNoStreamIndex,

    /// The talker has no bandwidth for the stream
    #[error("talker has no bandwidth")]
    TalkerNoBandwidth,

    /// The talker is exclusively connected elsewhere
    #[error("talker exclusive")]
    TalkerExclusive,

    /// The listener timed out waiting for the talker
    #[error("listener-talker timeout")]
    ListenerTalkerTimeout,

    /// The listener is exclusively connected elsewhere
    #[error("listener exclusive")]
    ListenerExclusive,

    /// The connection state is not retrievable right now
    #[error("state unavailable")]
    StateUnavailable,

    /// The stream is not connected
    #[error("not connected")]
    NotConnected,

    /// No such connection exists
    #[error("no such connection")]
    NoSuchConnection,

    /// The responder could not forward the message
    #[error("could not send message")]
    CouldNotSendMessage,

    /// The talker returned an inconsistent response
    #[error("talker misbehaving")]
    TalkerMisbehaving,

    /// The listener returned an inconsistent response
    #[error("listener misbehaving")]
    ListenerMisbehaving,

    /// The controller is not authorized for connection management
    #[error("controller not authorized")]
    ControllerNotAuthorized,

    /// The request conflicts with the stream's current state
    #[error("incompatible request")]
    IncompatibleRequest,

    /// The command is not supported by the responder
    #[error("not supported")]
    NotSupported,

    /// A network-level failure prevented the exchange
    #[error("network error")]
    NetworkError,

    /// The response could not be decoded
    #[error("protocol error")]
    ProtocolError,

    /// No response before the deadline, retries exhausted
    #[error("timed out")]
    TimedOut,

    /// The target entity is not (or no longer) known to the controller
    #[error("unknown entity")]
    UnknownEntity,

    /// The command was cancelled by controller shutdown
    #[error("aborted")]
    Aborted,

    /// Internal library error
    #[error("internal error")]
    InternalError,
}

impl AemError {
    /// Whether the failure is transient and the command may be retried.
    ///
    /// Only `TimedOut` and `LockedByOther` qualify; anything else is
    /// treated as a hard failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut | Self::LockedByOther)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControllerError::InterfaceNotFound {
            name: "eth7".to_string(),
        };
        assert_eq!(err.to_string(), "interface not found: eth7");

        let err = AemError::AcquiredByOther {
            owner: UniqueIdentifier::new(0xAAAA_AAAA_AAAA_AAAA),
        };
        assert_eq!(
            err.to_string(),
            "acquired by another controller (0xAAAAAAAAAAAAAAAA)"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AemError::TimedOut.is_transient());
        assert!(AemError::LockedByOther.is_transient());
        assert!(!AemError::InProgress.is_transient());
        assert!(!AemError::NetworkError.is_transient());
        assert!(!AemError::NoSuchDescriptor.is_transient());
        assert!(!AemError::UnknownEntity.is_transient());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ControllerError>();
        assert_send_sync::<AemError>();
        assert_send_sync::<AcmpError>();
    }
}
