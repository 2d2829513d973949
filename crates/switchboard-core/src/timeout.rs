//! Result-or-timeout wrapper for remote operations

use std::future::Future;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Bound applied to session initialize and send
pub const REMOTE_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `fut` to completion or fail with [`AgentError::Timeout`].
///
/// The timer is owned by the returned future, so it is dropped whichever
/// side settles first.
pub async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(AgentError::Remote),
        Err(_) => Err(AgentError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_ok() {
        let v = bounded("op", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_bounded_error_is_remote() {
        let err = bounded::<(), _>("op", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Remote(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_timeout() {
        let err = bounded::<(), _>("initialize", Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Timeout {
                operation: "initialize",
                ..
            }
        ));
    }
}
