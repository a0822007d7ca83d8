use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The storage provider could not list, read or update the queue
    #[error("Queue operation '{operation}' failed: {source}")]
    QueueOperationFailed {
        operation: &'static str,
        #[source]
        source: BridgeError,
    },

    /// Writing the scratch file failed
    #[error("Scratch file error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("Messaging session is not ready")]
    SessionNotReady,

    #[error("No group conversation named '{name}'")]
    DestinationNotFound { name: String },

    /// The messaging transport could not start or answer a query
    #[error("Messaging transport error: {0}")]
    Transport(#[source] BridgeError),

    #[error("Send failed: {0}")]
    SendFailed(#[source] BridgeError),

    /// The item did not end up in the delivered folder
    #[error("Acknowledge of {item_id} did not take effect: {reason}")]
    AcknowledgeFailed { item_id: String, reason: String },

    #[error("Session store error: {0}")]
    SessionStore(#[source] BridgeError),

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },
}

impl DeliveryError {
    pub(crate) fn queue(operation: &'static str) -> impl FnOnce(BridgeError) -> Self {
        move |source| DeliveryError::QueueOperationFailed { operation, source }
    }

    /// Whether the next scheduled run may succeed without intervention
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DeliveryError::DestinationNotFound { .. } | DeliveryError::InvalidSchedule { .. }
        )
    }
}

impl From<BridgeError> for DeliveryError {
    fn from(source: BridgeError) -> Self {
        DeliveryError::QueueOperationFailed {
            operation: "storage",
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
