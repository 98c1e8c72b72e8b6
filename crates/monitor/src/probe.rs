use std::error::Error as StdError;

use anyhow::Result;
use reqwest::Method;
use thiserror::Error;
use tracing::debug;

use crate::target::Target;

/// Why a single attempt produced no response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// One request attempt against a target.
///
/// Any response is reported as its status code, whatever the value. Judging
/// the code against the target's expectations happens one layer up.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn execute(&self, target: &Target) -> Result<u16, ProbeError>;
}

/// HTTP/HTTPS probe backed by a shared reqwest client
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("apimon/", env!("CARGO_PKG_VERSION")))
            // A redirect is a definitive answer from the target itself
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn execute(&self, target: &Target) -> Result<u16, ProbeError> {
        let method = Method::from_bytes(target.spec.method.to_uppercase().as_bytes())
            .map_err(|e| ProbeError::InvalidRequest(e.to_string()))?;

        let mut request =
            self.client.request(method, &target.spec.url).timeout(target.timeout());

        if let Some(headers) = &target.spec.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| classify(&e, target.spec.timeout_ms))?;
        let status = response.status().as_u16();

        debug!(target_id = %target.id, status, "probe received response");
        Ok(status)
    }
}

fn classify(err: &reqwest::Error, timeout_ms: u64) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout { timeout_ms }
    } else if err.is_builder() {
        ProbeError::InvalidRequest(describe(err))
    } else if err.is_connect() {
        ProbeError::Connect(describe(err))
    } else {
        ProbeError::Transport(describe(err))
    }
}

/// reqwest's top-level message hides the interesting part (refused, DNS, TLS)
/// in the source chain, so flatten it
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::target::TargetSpec;

    /// Minimal HTTP/1.1 endpoint: answers every request with `status` after `delay`,
    /// and keeps the raw request heads it received
    async fn stub_server(status: u16, delay: Duration) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut head = Vec::new();
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    seen.lock().unwrap().push(String::from_utf8_lossy(&head).into_owned());

                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 {status} Stub\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}/health"), requests)
    }

    /// Same client setup as `HttpProbe::new`, minus any proxy from the environment
    fn probe() -> HttpProbe {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        HttpProbe::with_client(client)
    }

    fn target(url: &str) -> Target {
        let mut spec = TargetSpec::new("stub", url);
        spec.timeout_ms = 500;
        Target::from_spec(spec)
    }

    #[tokio::test]
    async fn test_returns_status_for_any_response() {
        for code in [200u16, 204, 301, 404, 500] {
            let (url, _) = stub_server(code, Duration::ZERO).await;
            let probe = probe();

            assert_eq!(probe.execute(&target(&url)).await, Ok(code));
        }
    }

    #[tokio::test]
    async fn test_sends_method_and_headers() {
        let (url, requests) = stub_server(200, Duration::ZERO).await;
        let probe = probe();

        let mut t = target(&url);
        t.spec.method = "head".into();
        t.spec.headers = Some(BTreeMap::from([("x-probe-token".to_string(), "abc".to_string())]));

        assert_eq!(probe.execute(&t).await, Ok(200));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("HEAD /health HTTP/1.1"));
        assert!(requests[0].to_lowercase().contains("x-probe-token: abc"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_attempt() {
        let (url, _) = stub_server(200, Duration::from_secs(5)).await;
        let probe = probe();

        let mut t = target(&url);
        t.spec.timeout_ms = 100;

        assert_eq!(probe.execute(&t).await, Err(ProbeError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_failed_attempt() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = probe();
        let result = probe.execute(&target(&format!("http://{addr}/"))).await;

        match result {
            Err(ProbeError::Connect(message)) => assert!(!message.is_empty()),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_method_is_rejected_before_sending() {
        let probe = probe();
        let mut t = target("http://127.0.0.1:9/");
        t.spec.method = "GE T".into();

        assert!(matches!(probe.execute(&t).await, Err(ProbeError::InvalidRequest(_))));
    }

    #[test]
    fn test_default_client_builds() {
        assert!(HttpProbe::new().is_ok());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ProbeError::Timeout { timeout_ms: 100 }.to_string(),
            "request timed out after 100 ms"
        );
        assert_eq!(
            ProbeError::Connect("refused".into()).to_string(),
            "connection failed: refused"
        );
    }
}
