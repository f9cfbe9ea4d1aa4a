//! Active probing: the HTTP transport seam and response classification.

use crate::error::MonitorError;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// What the monitor sees of a heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub status: u16,
}

/// Maps a probe response to success (`true`) or failure. An `Err` counts as failure.
pub type StatusClassifier = Arc<dyn Fn(&HeartbeatResponse) -> Result<bool> + Send + Sync>;

/// Issues the GET request for a single probe.
pub trait HeartbeatTransport: Send + Sync {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HeartbeatResponse>>;
}

pub fn default_classifier(response: &HeartbeatResponse) -> bool {
    response.status == 200
}

/// Reduce a probe outcome to a single success flag.
///
/// Transport errors, classifier errors and classifier panics are all failures.
pub fn classify(outcome: Result<HeartbeatResponse>, classifier: Option<&StatusClassifier>) -> bool {
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("heartbeat request failed: {:#}", e);
            return false;
        }
    };

    let Some(classifier) = classifier else {
        return default_classifier(&response);
    };

    match panic::catch_unwind(AssertUnwindSafe(|| classifier(&response))) {
        Ok(Ok(success)) => success,
        Ok(Err(e)) => {
            tracing::warn!("heartbeat status function failed for status {}: {:#}", response.status, e);
            false
        }
        Err(_) => {
            tracing::warn!("heartbeat status function panicked for status {}", response.status);
            false
        }
    }
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` bounds the whole request; `None` leaves it to the OS.
    pub fn new(timeout: Option<Duration>) -> Result<Self, MonitorError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| MonitorError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HeartbeatTransport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HeartbeatResponse>> {
        async move {
            let resp = self.client.get(url).send().await?;
            Ok(HeartbeatResponse { status: resp.status().as_u16() })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn ok(status: u16) -> Result<HeartbeatResponse> {
        Ok(HeartbeatResponse { status })
    }

    #[test]
    fn test_default_classifier_only_accepts_200() {
        assert!(classify(ok(200), None));
        for status in [100, 201, 204, 301, 304, 404, 500, 503] {
            assert!(!classify(ok(status), None), "status {} should fail", status);
        }
    }

    #[test]
    fn test_transport_error_is_failure() {
        assert!(!classify(Err(anyhow!("connection refused")), None));

        let always: StatusClassifier = Arc::new(|_: &HeartbeatResponse| Ok(true));
        assert!(!classify(Err(anyhow!("dns failure")), Some(&always)));
    }

    #[test]
    fn test_custom_classifier_overrides_default() {
        let accept_2xx: StatusClassifier =
            Arc::new(|r: &HeartbeatResponse| Ok((200..300).contains(&r.status)));
        assert!(classify(ok(204), Some(&accept_2xx)));
        assert!(!classify(ok(404), Some(&accept_2xx)));
    }

    #[test]
    fn test_classifier_error_is_failure() {
        let failing: StatusClassifier =
            Arc::new(|_: &HeartbeatResponse| Err(anyhow!("unexpected body")));
        assert!(!classify(ok(200), Some(&failing)));
    }

    #[test]
    fn test_classifier_panic_is_failure() {
        let panicking: StatusClassifier =
            Arc::new(|_: &HeartbeatResponse| -> Result<bool> { panic!("boom") });
        assert!(!classify(ok(200), Some(&panicking)));
    }

    #[tokio::test]
    async fn test_reqwest_transport_reports_status() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let healthy = server.mock("GET", "/health").with_status(200).create_async().await;
        let broken = server.mock("GET", "/broken").with_status(503).create_async().await;

        let transport = ReqwestTransport::new(Some(Duration::from_secs(5)))?;

        let url = format!("{}/health", server.url());
        assert_eq!(transport.get(&url).await?.status, 200);
        let url = format!("{}/broken", server.url());
        assert_eq!(transport.get(&url).await?.status, 503);

        healthy.assert_async().await;
        broken.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_reqwest_transport_unreachable_host() -> Result<()> {
        let transport = ReqwestTransport::new(Some(Duration::from_secs(2)))?;
        // port 9 (discard) on loopback is not expected to serve HTTP
        let outcome = transport.get("http://127.0.0.1:9/health").await;
        assert!(!classify(outcome, None));
        Ok(())
    }
}
