//! DevTools HTTP endpoint discovery

use std::net::TcpListener;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::protocol::BrowserVersion;
use crate::{Error, Result};

/// The `/json/*` HTTP surface of a remote debugging port
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
    port: u16,
    client: reqwest::Client,
}

impl DevToolsEndpoint {
    pub fn new(port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .no_proxy()
            .build()?;
        Ok(Self { port, client })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// `GET /json/version`
    pub async fn version(&self) -> Result<BrowserVersion> {
        let url = format!("{}/json/version", self.base_url());
        let version = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<BrowserVersion>()
            .await?;
        Ok(version)
    }
}

/// Poll the endpoint until it answers or `timeout` elapses
pub async fn wait_for_endpoint(port: u16, timeout: Duration) -> Result<BrowserVersion> {
    let endpoint = DevToolsEndpoint::new(port)?;
    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < timeout {
        attempts += 1;

        match endpoint.version().await {
            Ok(version) => {
                debug!(
                    "DevTools endpoint ready after {} attempt(s): {}",
                    attempts, version.browser
                );
                return Ok(version);
            }
            Err(Error::Http(e)) => {
                if attempts == 1 {
                    info!("Waiting for DevTools endpoint on port {}...", port);
                }
                // Connection refused is expected while the process boots
                if !e.is_connect() && !e.is_timeout() {
                    warn!("DevTools endpoint error: {}", e);
                }
            }
            Err(e) => return Err(e),
        }

        sleep(Duration::from_millis(100)).await;
    }

    Err(Error::Timeout {
        seconds: timeout.as_secs(),
    })
}

/// Find a free loopback port to hand to `--remote-debugging-port`
pub fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[tokio::test]
    async fn test_wait_for_endpoint_times_out_on_closed_port() {
        let port = find_free_port().unwrap();
        let err = wait_for_endpoint(port, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
