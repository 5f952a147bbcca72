use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::debug;

use crate::types::{EndpointCandidate, ProbeResult};

/// Body substrings served by known multicast-to-unicast gateways.
pub const GATEWAY_SIGNATURES: [&str; 2] = ["Multi stream daemon", "udpxy status"];

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Checks one candidate endpoint for a gateway status page.
///
/// Implementations never fail: every error is a non-match.
#[async_trait]
pub trait GatewayProbe: Send + Sync {
    async fn probe(&self, candidate: EndpointCandidate, path: &str) -> ProbeResult;
}

pub fn is_gateway_body(body: &str) -> bool {
    GATEWAY_SIGNATURES.iter().any(|sig| body.contains(sig))
}

/// HTTP GET probe with a bounded timeout and redirects disabled.
#[derive(Debug, Clone)]
pub struct HttpGatewayProbe {
    client: Client,
}

impl HttpGatewayProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        // A redirect could land on another subnet's gateway.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GatewayProbe for HttpGatewayProbe {
    async fn probe(&self, candidate: EndpointCandidate, path: &str) -> ProbeResult {
        let url = candidate.url(path);
        let matched = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => is_gateway_body(&body),
                Err(e) => {
                    debug!(%url, "failed to read body: {e}");
                    false
                }
            },
            Ok(resp) => {
                debug!(%url, status = %resp.status(), "non-success status");
                false
            }
            Err(e) => {
                debug!(%url, "probe failed: {e}");
                false
            }
        };
        ProbeResult { candidate, matched }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_match() {
        assert!(is_gateway_body("<html><title>udpxy status</title>"));
        assert!(is_gateway_body("Multi stream daemon v1.2"));
        assert!(!is_gateway_body("<html>router login</html>"));
    }
}
