use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_postgres::error::SqlState;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Runs a store call, retrying up to three times while it fails with a transient error.
/// Anything else (decode errors, constraint violations) is returned on the first failure.
pub(crate) async fn with_store_retry<T, F, Fut>(what: &str, mut call: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {:#}",
                    what,
                    attempt,
                    MAX_ATTEMPTS,
                    RETRY_DELAY,
                    err
                );
                tokio::time::sleep(RETRY_DELAY).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Dropped connections, I/O failures and serialization conflicts may succeed on a later try.
pub(crate) fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(pg) = cause.downcast_ref::<tokio_postgres::Error>() {
            return match pg.code() {
                None => true,
                Some(code) => [
                    SqlState::T_R_SERIALIZATION_FAILURE,
                    SqlState::T_R_DEADLOCK_DETECTED,
                    SqlState::CONNECTION_EXCEPTION,
                    SqlState::CONNECTION_FAILURE,
                    SqlState::ADMIN_SHUTDOWN,
                    SqlState::TOO_MANY_CONNECTIONS,
                ]
                .contains(code),
            };
        }
        cause.downcast_ref::<io::Error>().is_some()
    })
}
