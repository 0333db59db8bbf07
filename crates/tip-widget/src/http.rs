//! HTTP implementation of [`TipBackend`] against the tip REST surface.
//!
//! Three endpoints: `POST getinvoice`, `POST invoicesettled` and
//! `GET eventsource` (server-sent events, one settled identifier per event).
//! Wire field names are PascalCase.

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{Invoice, SettlementStatus, SettlementStream, TipBackend};
use crate::error::{Result, TipError};

/// Default timeout on the creation and poll requests. The push stream is
/// long-lived and exempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`HttpTipBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl HttpBackendConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP backend client.
#[derive(Debug, Clone)]
pub struct HttpTipBackend {
    base_url: Url,
    request_timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetInvoiceRequest<'a> {
    amount: u64,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetInvoiceResponse {
    invoice: String,
    expiry: u64,
    r_hash: String,
    #[serde(default)]
    picture: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InvoiceSettledRequest<'a> {
    r_hash: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvoiceSettledResponse {
    settled: bool,
    #[serde(default)]
    picture: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    error: String,
}

impl HttpTipBackend {
    /// Build a client for `config.base_url`. Path joining tolerates a
    /// missing trailing slash.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if base.is_empty() {
            return Err(TipError::Config("backend base URL is empty".to_string()));
        }
        if !base.ends_with('/') {
            base.push('/');
        }

        let base_url = Url::parse(&base)
            .map_err(|error| TipError::Config(format!("invalid backend base URL: {error}")))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(TipError::Config(format!(
                "backend base URL must use http:// or https://, got: {}",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| TipError::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            request_timeout: config.request_timeout,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|error| TipError::Config(format!("invalid endpoint path {path}: {error}")))
    }

    async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| TipError::BackendUnreachable {
                detail: error.to_string(),
            })?;
        decode_json_response(response).await
    }
}

#[async_trait]
impl TipBackend for HttpTipBackend {
    async fn create_invoice(&self, amount: u64, message: &str) -> Result<Invoice> {
        let response: GetInvoiceResponse = self
            .post_json("getinvoice", &GetInvoiceRequest { amount, message })
            .await?;

        Ok(Invoice {
            payload: response.invoice,
            identifier: response.r_hash,
            expiry_seconds: response.expiry,
            picture_url: non_empty(response.picture),
        })
    }

    async fn check_settled(&self, identifier: &str) -> Result<SettlementStatus> {
        let response: InvoiceSettledResponse = self
            .post_json("invoicesettled", &InvoiceSettledRequest { r_hash: identifier })
            .await?;

        Ok(SettlementStatus {
            settled: response.settled,
            picture_url: non_empty(response.picture),
        })
    }

    async fn settlement_stream(&self) -> Result<SettlementStream> {
        let url = self.endpoint("eventsource")?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| TipError::ChannelDegraded(error.to_string()))?;
        if !response.status().is_success() {
            return Err(TipError::ChannelDegraded(format!(
                "eventsource returned status {}",
                response.status()
            )));
        }

        Ok(sse_identifier_stream(response.bytes_stream()))
    }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| TipError::BackendUnreachable {
            detail: error.to_string(),
        })?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|error| TipError::BackendUnreachable {
            detail: format!("malformed response: {error}"),
        });
    }

    match serde_json::from_slice::<ErrorResponse>(&bytes) {
        Ok(body) => Err(TipError::BackendRejected(body.error)),
        Err(_) => Err(TipError::BackendUnreachable {
            detail: format!("status {status}"),
        }),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

/// Incremental server-sent-events decoder, reduced to what the settlement
/// stream needs: `data:` lines accumulate, a blank line dispatches the event,
/// comment and non-data field lines are ignored.
struct SseDecoder {
    buffer: String,
    data: Vec<String>,
}

impl SseDecoder {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            data: Vec::new(),
        }
    }

    /// Feed a chunk of bytes; returns the data payloads of every event
    /// completed by this chunk.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=newline).collect();
            let line = raw.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            } else if line == "data" {
                self.data.push(String::new());
            }
            // comments and event:/id:/retry: fields carry nothing we need
        }

        events
    }
}

fn sse_identifier_stream<B, E, S>(bytes: S) -> SettlementStream
where
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::new(), VecDeque::new());
    futures::stream::try_unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
        loop {
            if let Some(identifier) = pending.pop_front() {
                return Ok(Some((identifier, (bytes, decoder, pending))));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                Some(Err(error)) => return Err(TipError::ChannelDegraded(error.to_string())),
                None => return Ok(None),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::http::{StatusCode, header};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures::StreamExt;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::{
        GetInvoiceRequest, HttpBackendConfig, HttpTipBackend, InvoiceSettledRequest, SseDecoder,
        sse_identifier_stream,
    };
    use crate::backend::TipBackend;

    async fn spawn_backend(app: Router) -> anyhow::Result<HttpTipBackend> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(HttpTipBackend::new(HttpBackendConfig::new(format!(
            "http://{address}"
        )))?)
    }

    #[test]
    fn request_bodies_use_pascal_case_fields() -> anyhow::Result<()> {
        let invoice = serde_json::to_value(GetInvoiceRequest {
            amount: 100,
            message: "thanks",
        })?;
        assert_eq!(invoice, json!({"Amount": 100, "Message": "thanks"}));

        let settled = serde_json::to_value(InvoiceSettledRequest { r_hash: "h1" })?;
        assert_eq!(settled, json!({"RHash": "h1"}));
        Ok(())
    }

    #[test]
    fn base_url_validation() {
        assert!(HttpTipBackend::new(HttpBackendConfig::new("http://127.0.0.1:8081")).is_ok());
        assert!(HttpTipBackend::new(HttpBackendConfig::new("http://127.0.0.1:8081/tiprest")).is_ok());

        let empty = HttpTipBackend::new(HttpBackendConfig::new("  "));
        assert!(matches!(empty, Err(error) if error.kind() == "config"));

        let scheme = HttpTipBackend::new(HttpBackendConfig::new("ftp://host/"));
        assert!(matches!(scheme, Err(error) if error.kind() == "config"));
    }

    #[tokio::test]
    async fn create_invoice_maps_success_response() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/getinvoice",
            post(|| async {
                Json(json!({
                    "Invoice": "lnbc1invoice",
                    "Expiry": 3600,
                    "RHash": "h1",
                    "Picture": ""
                }))
            }),
        );
        let backend = spawn_backend(app).await?;

        let invoice = backend.create_invoice(100, "thanks").await?;
        assert_eq!(invoice.payload, "lnbc1invoice");
        assert_eq!(invoice.identifier, "h1");
        assert_eq!(invoice.expiry_seconds, 3600);
        assert_eq!(invoice.picture_url, None, "empty picture maps to None");
        Ok(())
    }

    #[tokio::test]
    async fn create_invoice_surfaces_server_error_payload() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/getinvoice",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"Error": "Amount too small"})),
                )
            }),
        );
        let backend = spawn_backend(app).await?;

        let error = backend
            .create_invoice(1, "")
            .await
            .expect_err("server rejected the request");
        assert_eq!(error.kind(), "backend_rejected");
        assert_eq!(error.to_string(), "Amount too small");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_response_is_backend_unreachable() -> anyhow::Result<()> {
        let app = Router::new().route("/getinvoice", post(|| async { "not json" }));
        let backend = spawn_backend(app).await?;

        let error = backend
            .create_invoice(100, "")
            .await
            .expect_err("body is not JSON");
        assert_eq!(error.kind(), "backend_unreachable");
        assert!(error.to_string().starts_with("Failed to reach backend"));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_backend_is_backend_unreachable() {
        let backend = HttpTipBackend::new(HttpBackendConfig::new("http://127.0.0.1:9/"))
            .expect("client builds");
        let error = backend
            .create_invoice(100, "")
            .await
            .expect_err("nothing listens on the discard port");
        assert_eq!(error.kind(), "backend_unreachable");
    }

    #[tokio::test]
    async fn check_settled_maps_poll_response() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/invoicesettled",
            post(|| async {
                Json(json!({"Settled": true, "Picture": "https://host/pic.png"}))
            }),
        );
        let backend = spawn_backend(app).await?;

        let status = backend.check_settled("h1").await?;
        assert!(status.settled);
        assert_eq!(status.picture_url.as_deref(), Some("https://host/pic.png"));
        Ok(())
    }

    #[tokio::test]
    async fn settlement_stream_yields_event_identifiers() -> anyhow::Result<()> {
        let app = Router::new().route(
            "/eventsource",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: other\n\ndata: h1\n\n",
                )
            }),
        );
        let backend = spawn_backend(app).await?;

        let stream = backend.settlement_stream().await?;
        let identifiers: Vec<String> = stream
            .map(|event| event.expect("stream event"))
            .collect()
            .await;
        assert_eq!(identifiers, vec!["other".to_string(), "h1".to_string()]);
        Ok(())
    }

    #[test]
    fn sse_decoder_framing() {
        struct Case {
            name: &'static str,
            chunks: Vec<&'static str>,
            expected: Vec<&'static str>,
        }

        let cases = vec![
            Case {
                name: "single event",
                chunks: vec!["data: h1\n\n"],
                expected: vec!["h1"],
            },
            Case {
                name: "event split across chunks",
                chunks: vec!["data: h", "1\n", "\n"],
                expected: vec!["h1"],
            },
            Case {
                name: "no space after colon",
                chunks: vec!["data:h1\n\n"],
                expected: vec!["h1"],
            },
            Case {
                name: "crlf line endings",
                chunks: vec!["data: h1\r\n\r\n"],
                expected: vec!["h1"],
            },
            Case {
                name: "multi-line data joined with newline",
                chunks: vec!["data: first\ndata: second\n\n"],
                expected: vec!["first\nsecond"],
            },
            Case {
                name: "comments and other fields ignored",
                chunks: vec![": keep-alive\nevent: settled\nid: 7\ndata: h1\n\n"],
                expected: vec!["h1"],
            },
            Case {
                name: "blank line without data dispatches nothing",
                chunks: vec!["\n\n: ping\n\n"],
                expected: vec![],
            },
        ];

        for case in cases {
            let mut decoder = SseDecoder::new();
            let mut events = Vec::new();
            for chunk in &case.chunks {
                events.extend(decoder.feed(chunk.as_bytes()));
            }
            assert_eq!(events, case.expected, "{}", case.name);
        }
    }

    #[tokio::test]
    async fn identifier_stream_buffers_multiple_events_per_chunk() {
        let chunks: Vec<Result<&'static [u8], Infallible>> =
            vec![Ok(b"data: a\n\ndata: b\n\ndata: c\n\n")];
        let stream = sse_identifier_stream(futures::stream::iter(chunks));

        let identifiers: Vec<String> = stream
            .map(|event| event.expect("stream event"))
            .collect()
            .await;
        assert_eq!(identifiers, vec!["a", "b", "c"]);
    }
}
