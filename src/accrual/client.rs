//! HTTP client for the external accrual computation service.
//!
//! One GET per order number; a non-200 answer is an error and the order is
//! simply picked up again on a later dispatcher tick, so the client itself
//! never retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::models::AccrualReply;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("accrual request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("accrual service answered {0}")]
    Status(StatusCode),
}

/// Seam between the dispatcher and the upstream service; tests substitute
/// a stub.
#[async_trait]
pub trait External: Send + Sync {
    async fn order_accrual(&self, number: &str) -> Result<AccrualReply, ClientError>;
}

pub struct AccrualClient {
    http: reqwest::Client,
    base: String,
}

impl AccrualClient {
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base: normalize_base(addr),
        })
    }
}

/// Configured addresses come in as `:8082`, `host:8082` or a full URL;
/// normalize to a scheme-qualified base with exactly one trailing slash.
fn normalize_base(addr: &str) -> String {
    let mut base = if addr.starts_with(':') {
        format!("http://localhost{addr}")
    } else if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };

    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

#[async_trait]
impl External for AccrualClient {
    async fn order_accrual(&self, number: &str) -> Result<AccrualReply, ClientError> {
        let url = format!("{}api/orders/{}", self.base, number);

        let resp = self.http.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(ClientError::Status(resp.status()));
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use rust_decimal_macros::dec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn base_normalization() {
        assert_eq!(normalize_base(":8082"), "http://localhost:8082/");
        assert_eq!(normalize_base("accrual:8082"), "http://accrual:8082/");
        assert_eq!(normalize_base("http://accrual:8082"), "http://accrual:8082/");
        assert_eq!(
            normalize_base("http://accrual:8082/"),
            "http://accrual:8082/"
        );
        assert_eq!(
            normalize_base("https://accrual.example.com"),
            "https://accrual.example.com/"
        );
    }

    /// Serve one canned HTTP response on an ephemeral port.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len(),
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });

        addr
    }

    #[tokio::test]
    async fn decodes_a_successful_reply() {
        let addr = one_shot_server(
            "200 OK",
            r#"{"order":"79927398713","status":"PROCESSED","accrual":500}"#,
        )
        .await;

        let client = AccrualClient::new(&addr.to_string()).unwrap();
        let reply = client.order_accrual("79927398713").await.unwrap();

        assert_eq!(reply.order, "79927398713");
        assert_eq!(reply.status, OrderStatus::Processed);
        assert_eq!(reply.accrual, dec!(500));
    }

    #[tokio::test]
    async fn non_200_is_reported_as_retryable_failure() {
        let addr = one_shot_server("204 No Content", "").await;

        let client = AccrualClient::new(&addr.to_string()).unwrap();
        let err = client.order_accrual("79927398713").await.unwrap_err();

        assert!(matches!(err, ClientError::Status(s) if s == StatusCode::NO_CONTENT));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        // bind-then-drop yields a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = AccrualClient::new(&addr.to_string()).unwrap();
        assert!(client.order_accrual("79927398713").await.is_err());
    }
}
