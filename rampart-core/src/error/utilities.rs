use std::{future::Future, time::Duration};

use crate::{Error, error::StorageError};

/// Extension trait for Result types to simplify database error mapping
///
/// # Example
///
/// ```rust,ignore
/// use rampart_core::error::utilities::DatabaseResultExt;
///
/// query.execute(&pool).await.map_db_err_with_context("Failed to record failure")?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Convert a database error to a storage error
    fn map_db_err(self) -> Result<T, Error>;

    /// Convert a database error to a storage error with additional context
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }
}

/// Run a store operation with an upper bound on how long it may take.
///
/// A hung store call surfaces as [`StorageError::Timeout`] so each caller can
/// apply its own fail-open or fail-closed policy.
pub async fn with_store_timeout<T, F>(timeout: Duration, operation: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::Storage(StorageError::Timeout(
            timeout.as_millis() as u64,
        ))),
    }
}

/// Macro to convert any error to a storage database error with context
///
/// # Example
///
/// ```rust,ignore
/// use rampart_core::map_storage_err_with_context;
///
/// map_storage_err_with_context!(query.execute(&pool).await, "Failed to purge records")?;
/// ```
#[macro_export]
macro_rules! map_storage_err_with_context {
    ($result:expr, $context:expr) => {
        $result.map_err(|e| {
            $crate::Error::Storage($crate::error::StorageError::Database(format!(
                "{}: {}",
                $context, e
            )))
        })
    };
}
