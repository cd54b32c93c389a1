use log::trace;
use resource_provider::{IntoProviderError, ProviderError, ProviderResult, Resources};
use std::future::Future;
use std::time::Duration;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(15);
pub(crate) const CLUSTER_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub(crate) const NODEGROUP_TIMEOUT: Duration = Duration::from_secs(20 * 60);
pub(crate) const ADDON_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub(crate) const NETWORK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Call `check` every [`POLL_INTERVAL`] until it returns a value, fails, or `limit` elapses. A
/// timeout is reported with `resources`.
pub(crate) async fn poll<T, F, Fut>(
    what: &str,
    limit: Duration,
    resources: Resources,
    mut check: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<T>>>,
{
    let result = tokio::time::timeout(limit, async {
        loop {
            if let Some(value) = check().await? {
                return Ok::<T, ProviderError>(value);
            }
            trace!("Still waiting for {}, sleeping {:?}", what, POLL_INTERVAL);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .context(
        resources,
        format!("Timed out after {:?} waiting for {}", limit, what),
    )?;
    result
}

#[cfg(test)]
mod test {
    use super::poll;
    use resource_provider::{ProviderError, Resources};
    use std::time::Duration;

    #[tokio::test]
    async fn ready_values_return_immediately() {
        let mut calls = 0;
        let value = poll("a test", Duration::from_secs(1), Resources::Clear, || {
            calls += 1;
            async { Ok(Some(7)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn errors_stop_the_wait() {
        let err = poll::<(), _, _>("a test", Duration::from_secs(1), Resources::Clear, || async {
            Err(ProviderError::new_with_context(Resources::Remaining, "FAILED"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.resources(), Resources::Remaining);
    }

    #[tokio::test]
    async fn timeouts_carry_the_given_resources() {
        let err = poll::<(), _, _>("a test", Duration::from_millis(10), Resources::Unknown, || async {
            Ok(None)
        })
        .await
        .unwrap_err();
        assert_eq!(err.resources(), Resources::Unknown);
        assert!(err.message().contains("waiting for a test"));
    }
}
