//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Period advances are
//! retried as a whole, never step by step.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::RetryConfig;
use crate::error::LedgerError;

/// Backoff for whole-operation retries of a period advance.
///
/// - Min/max delay and attempts from `RetryConfig`
/// - Jitter enabled
pub fn settlement_backoff(config: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts)
        .with_jitter()
}

/// Determines if a ledger error is worth retrying.
///
/// Retryable: transient storage failures (timeouts, aborted transactions,
/// pool exhaustion). Everything else is deterministic and will fail again.
pub fn is_retryable(error: &LedgerError) -> bool {
    error.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArithmeticError, ConflictError};
    use crate::interfaces::StorageError;
    use crate::model::ChitId;

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&LedgerError::Storage(StorageError::Timeout(
            Duration::from_secs(1)
        ))));
        assert!(is_retryable(&LedgerError::Storage(StorageError::Aborted(
            "busy".to_string()
        ))));
        assert!(!is_retryable(&LedgerError::Storage(StorageError::Duplicate {
            entity: "auction",
            key: "chit 1 period 1".to_string(),
        })));
        assert!(!is_retryable(&LedgerError::Conflict(
            ConflictError::AuctionAlreadySettled {
                chit: ChitId(1),
                period: 1
            }
        )));
        assert!(!is_retryable(&LedgerError::Arithmetic(ArithmeticError::Overflow(
            "prize money"
        ))));
    }
}
