use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{JurisError, TransportError};
use crate::frame::ByteStream;
use crate::wizard::WizardKind;

/// One streaming request: which wizard endpoint, and the JSON body to post.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub wizard: WizardKind,
    pub body: serde_json::Value,
}

/// Opens an SSE response and hands back its body as a byte stream.
///
/// Implementations must report non-success statuses as
/// [`TransportError::Status`] and must not retry.
#[async_trait::async_trait]
pub trait SseTransport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;
}

/// HTTP transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self, JurisError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| JurisError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from the `JURIS_*` environment.
    pub fn from_env() -> Result<Self, JurisError> {
        Self::new(ClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl SseTransport for ReqwestTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let url = self.config.stream_url(request.wizard);
        debug!(wizard = %request.wizard, url = %url, "opening SSE stream");

        let mut http_req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        if let Some(key) = &self.config.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::request(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(stream))
    }
}
