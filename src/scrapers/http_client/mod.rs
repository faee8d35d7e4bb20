//! Plain HTTP fetching with politeness admission and retries.

mod response;
mod retry;
mod user_agent;

pub use response::page_from_parts;
pub use retry::RetryPolicy;
pub use user_agent::{resolve_user_agent, robots_token, DEFAULT_USER_AGENT};

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::rate_limiter::PolitenessGate;
use super::{FetchError, FetchedPage};

/// HTTP client that goes through the politeness gate for every request.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    gate: PolitenessGate,
    retry: RetryPolicy,
    user_agent: String,
}

impl HttpClient {
    /// Build a client. `verify_tls = false` accepts invalid certificates.
    pub fn new(
        gate: PolitenessGate,
        user_agent: Option<&str>,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<Self, reqwest::Error> {
        let user_agent = resolve_user_agent(user_agent);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;

        Ok(Self {
            client,
            gate,
            retry: RetryPolicy::default(),
            user_agent,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn gate(&self) -> &PolitenessGate {
        &self.gate
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One admitted GET, no retries.
    pub async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let admission = self
            .gate
            .acquire(url)
            .await
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        self.gate.verify(&admission, url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(url, e))?;

        let status = response.status().as_u16();
        if PolitenessGate::is_rate_limit(status) {
            self.gate.report_rate_limit(&admission.domain, status).await;
        } else if response.status().is_success() {
            self.gate.report_success(&admission.domain).await;
        }

        if !response.status().is_success() {
            return Err(FetchError::from_status(url, status));
        }

        response::into_page(url, response).await
    }

    /// GET with exponential backoff on transient failures.
    pub async fn get_with_retry(&self, url: &str) -> Result<FetchedPage, FetchError> {
        with_retry(&self.retry, url, move || self.get(url)).await
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the policy runs out.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut attempt: F,
) -> Result<FetchedPage, FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<FetchedPage, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut n = 0;
    loop {
        n += 1;
        match attempt().await {
            Ok(page) => return Ok(page),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if n >= max_attempts => {
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: n,
                    last: e.to_string(),
                })
            }
            Err(e) => {
                let delay = policy.delay_for(n);
                debug!("Attempt {} for {} failed ({}), retrying in {:?}", n, url, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn ok_page(url: &str) -> FetchedPage {
        page_from_parts(url, url, 200, Some("text/plain".into()), b"ok".to_vec(), false)
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let url = "https://a.gov/x";
        let result = with_retry(&fast_policy(5), url, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FetchError::from_status(url, 503))
            } else {
                Ok(ok_page(url))
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let url = "https://a.gov/x";
        let result = with_retry(&fast_policy(3), url, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::from_status(url, 500))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let url = "https://a.gov/missing";
        let result = with_retry(&fast_policy(5), url, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::from_status(url, 404))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Permanent { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_builds_without_tls_verification() {
        let client = HttpClient::new(
            PolitenessGate::new(),
            None,
            Duration::from_secs(5),
            false,
        )
        .unwrap();
        assert_eq!(client.user_agent(), DEFAULT_USER_AGENT);
    }
}
