//! Shared helpers (error types, store retry policies).

pub mod error;
pub mod retry;

pub use error::{BadDataError, ClustererError, ConfigError, ErrorKind, StoreError};
pub use retry::{RetryPolicy, RetryStrategy};
