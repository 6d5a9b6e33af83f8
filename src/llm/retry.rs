//! Bounded retry with jittered exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use super::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;

/// Wraps a provider and retries transient failures (rate limits, transport errors).
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }

    fn backoff(&self, attempt: u32, error: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after: Some(after),
            ..
        } = error
        {
            return *after;
        }
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exp + jitter
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt, &e);
                    warn!(
                        model = self.inner.model_name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::llm::provider::{ChatMessage, FinishReason};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _r: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.transient {
                    return Err(LlmError::RateLimited {
                        provider: "flaky".into(),
                        retry_after: Some(Duration::from_millis(1)),
                    });
                }
                return Err(LlmError::AuthFailed {
                    provider: "flaky".into(),
                });
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            transient: true,
        });
        let provider = RetryProvider::new(inner.clone(), 3, Duration::from_millis(1));
        let resp = provider.complete(request()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            transient: true,
        });
        let provider = RetryProvider::new(inner.clone(), 2, Duration::from_millis(1));
        assert!(provider.complete(request()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let inner = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
            transient: false,
        });
        let provider = RetryProvider::new(inner.clone(), 3, Duration::from_millis(1));
        assert!(matches!(
            provider.complete(request()).await,
            Err(LlmError::AuthFailed { .. })
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
