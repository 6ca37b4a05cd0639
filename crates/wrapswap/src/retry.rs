use crate::errors::SwapError;
use std::time::Duration;

/// Retry contract for outbound RPC calls that go through an HTTP proxy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the final one.
    pub max_attempts: usize,
    /// Fixed sleep between attempts.
    pub backoff: Duration,
    /// Run the fallback (drop the proxy) right before the final attempt.
    pub disable_proxy_on_final: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            disable_proxy_on_final: true,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-proxy error, or attempts run out.
    ///
    /// Only [`SwapError::Proxy`] is retried. Before the last attempt `fallback` is invoked once
    /// (when enabled) so that attempt can go out without the proxy.
    pub async fn run<T, Fut>(
        &self,
        context_label: &'static str,
        mut op: impl FnMut() -> Fut + Send,
        fallback: impl FnOnce() + Send,
    ) -> Result<T, SwapError>
    where
        Fut: std::future::Future<Output = Result<T, SwapError>> + Send,
    {
        if self.max_attempts == 0 {
            return Err(SwapError::config("invalid retry policy: max_attempts=0"));
        }

        let mut fallback = Some(fallback);
        let mut attempt = 1_usize;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_proxy() => e,
                Err(e) => return Err(e),
            };

            tracing::warn!(
                op = context_label,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "proxy error"
            );
            if attempt >= self.max_attempts {
                return Err(err);
            }

            tokio::time::sleep(self.backoff).await;
            attempt += 1;

            if attempt == self.max_attempts && self.disable_proxy_on_final {
                if let Some(f) = fallback.take() {
                    tracing::info!(op = context_label, "disabling proxy for the final attempt");
                    f();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn proxy_err() -> SwapError {
        SwapError::Proxy {
            context: "test",
            message: "proxy CONNECT tunnel failed".to_owned(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn succeeds_on_final_attempt_after_disabling_proxy() -> eyre::Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let proxy_on = Arc::new(AtomicBool::new(true));

        let calls2 = Arc::clone(&calls);
        let proxy_read = Arc::clone(&proxy_on);
        let proxy_write = Arc::clone(&proxy_on);
        let out = fast_policy()
            .run(
                "op",
                move || {
                    let calls3 = Arc::clone(&calls2);
                    let proxy_read = Arc::clone(&proxy_read);
                    async move {
                        calls3.fetch_add(1, Ordering::SeqCst);
                        if proxy_read.load(Ordering::SeqCst) {
                            Err(proxy_err())
                        } else {
                            Ok(42_i32)
                        }
                    }
                },
                move || proxy_write.store(false, Ordering::SeqCst),
            )
            .await?;

        assert_eq!(out, 42_i32, "unexpected result");
        assert_eq!(calls.load(Ordering::SeqCst), 3, "expected three attempts");
        assert!(!proxy_on.load(Ordering::SeqCst), "proxy should stay disabled");
        Ok(())
    }

    #[tokio::test]
    async fn non_proxy_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let res: Result<(), SwapError> = fast_policy()
            .run(
                "op",
                move || {
                    let calls3 = Arc::clone(&calls2);
                    async move {
                        calls3.fetch_add(1, Ordering::SeqCst);
                        Err(SwapError::Network {
                            context: "test",
                            message: "connection refused".to_owned(),
                        })
                    }
                },
                || {},
            )
            .await;
        assert!(matches!(res, Err(SwapError::Network { .. })), "got {res:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "network errors must not retry");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fallbacks = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let fallbacks2 = Arc::clone(&fallbacks);
        let res: Result<(), SwapError> = fast_policy()
            .run(
                "op",
                move || {
                    let calls3 = Arc::clone(&calls2);
                    async move {
                        calls3.fetch_add(1, Ordering::SeqCst);
                        Err(proxy_err())
                    }
                },
                move || {
                    fallbacks2.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert!(res.as_ref().is_err_and(SwapError::is_proxy), "got {res:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 3, "attempt count");
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1, "fallback runs once");
    }

    #[tokio::test]
    async fn first_success_short_circuits() -> eyre::Result<()> {
        let out = fast_policy()
            .run("op", || async { Ok::<_, SwapError>("ok") }, || {})
            .await?;
        assert_eq!(out, "ok");
        Ok(())
    }
}
