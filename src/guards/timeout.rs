use crate::error::OrchestratorError;
use std::future::Future;
use std::time::Duration;

/// Race `fut` against `duration`. On expiry, `fut` is dropped and an
/// `OrchestratorError::Timeout` is returned.
pub async fn with_timeout<F, T>(
    fut: F,
    duration: Duration,
    label: &str,
) -> Result<T, OrchestratorError>
where
    F: Future<Output = Result<T, OrchestratorError>>,
{
    tokio::select! {
        result = fut => result,
        () = tokio::time::sleep(duration) => Err(OrchestratorError::Timeout {
            op: label.to_string(),
            ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_inner_result_when_faster_than_deadline() {
        let result = with_timeout(
            async { Ok::<_, OrchestratorError>(7) },
            Duration::from_millis(50),
            "op",
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn times_out_when_slower_than_deadline() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, OrchestratorError>(())
            },
            Duration::from_millis(10),
            "slow-op",
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::Timeout { .. })));
    }
}
