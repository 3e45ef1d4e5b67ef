use std::time::Duration;

use thiserror::Error;

/// Classification of a failed gateway dispatch. The consumer branches on
/// this to pick between the backoff loop and immediate dead-lettering.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    #[error("circuit breaker is open, next attempt allowed in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}
