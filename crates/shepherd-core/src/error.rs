use thiserror::Error;

/// Input problems caught before anything is sent to an external service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Tip cannot be negative")]
    NegativeTip,

    #[error("Ticket price cannot be negative")]
    NegativePrice,

    #[error("Order total is too large")]
    AmountTooLarge,

    #[error("Registration is closed for {0}")]
    RegistrationClosed(String),

    #[error("Only {available} spots left for {event}")]
    OverCapacity { event: String, available: u32 },

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Message body cannot be empty")]
    EmptyMessage,

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("{0} is required")]
    Missing(&'static str),
}
