//! Minimal HTTP endpoint for `/metrics` and `/health`
//!
//! Connections are not kept alive. Anything other than a `GET` for a known
//! path gets a 400 or 404.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::ScenarioMetrics;

/// HTTP server exposing a [`ScenarioMetrics`] store
#[derive(Debug)]
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Arc<ScenarioMetrics>,
}

impl MetricsServer {
    /// Bind the listener
    pub async fn bind(addr: &str, metrics: Arc<ScenarioMetrics>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Metrics server listening on {}", listener.local_addr()?);
        Ok(Self { listener, metrics })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires
    pub async fn serve(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Metrics server shutting down");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let metrics = self.metrics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &metrics).await {
                                tracing::debug!("Metrics connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Metrics accept error: {}", e),
                },
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    metrics: &ScenarioMetrics,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let response = match parse_request_path(&request) {
        Some(path) => dispatch(path, metrics),
        None => http_response(400, "text/plain", "Bad Request"),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn parse_request_path(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    (method == "GET").then_some(path)
}

fn dispatch(path: &str, metrics: &ScenarioMetrics) -> String {
    match path {
        "/metrics" => http_response(
            200,
            "text/plain; version=0.0.4; charset=utf-8",
            &metrics.render(),
        ),
        "/health" => http_response(200, "text/plain", "OK"),
        _ => http_response(404, "text/plain", "Not Found"),
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    };

    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    #[test]
    fn test_parse_request_path() {
        assert_eq!(
            parse_request_path("GET /metrics HTTP/1.1\r\nHost: localhost\r\n"),
            Some("/metrics")
        );
        assert_eq!(parse_request_path("POST /metrics HTTP/1.1\r\n"), None);
        assert_eq!(parse_request_path(""), None);
    }

    #[test]
    fn test_dispatch_unknown_path() {
        let metrics = ScenarioMetrics::new();
        assert!(dispatch("/nope", &metrics).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_http_response_format() {
        let resp = http_response(200, "text/plain", "OK");
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("Content-Length: 2\r\n"));
        assert!(resp.ends_with("OK"));
    }

    #[tokio::test]
    async fn test_serves_metrics_over_tcp() {
        let metrics = Arc::new(ScenarioMetrics::new());
        metrics.set_scenario_active(true);
        let server = MetricsServer::bind("127.0.0.1:0", metrics).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.serve(cancel.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("scenario_active 1"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
