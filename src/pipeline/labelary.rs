//! Labelary backend: render one ZPL label to a PDF page over HTTP.
//!
//! The endpoint is addressed by print density, label size and label index:
//!
//! ```text
//! POST {base}/printers/{dpmm}dpmm/labels/{width}x{height}/{index}/
//! Accept: application/pdf
//! <raw ZPL body>
//! ```
//!
//! Status codes are passed through untouched; the retry decision belongs to
//! [`crate::pipeline::render::RenderClient`]. A `200` whose body is not a PDF
//! counts as a malformed response, i.e. a transport failure.

use crate::config::LabelaryEndpoint;
use crate::error::ZplError;
use crate::pipeline::render::{LabelRenderer, RenderFailure, RenderResponse, STATUS_OK};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// [`LabelRenderer`] backed by the Labelary HTTP API.
pub struct LabelaryRenderer {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl LabelaryRenderer {
    /// Build a renderer for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &LabelaryEndpoint, timeout_secs: u64) -> Result<Self, ZplError> {
        let url = reqwest::Url::parse(&endpoint.render_url()).map_err(|e| {
            ZplError::InvalidConfig(format!("Invalid render endpoint '{}': {e}", endpoint.base_url))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("zpl2pdf/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZplError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl LabelRenderer for LabelaryRenderer {
    fn name(&self) -> &str {
        "labelary"
    }

    async fn render(&self, zpl: &str) -> Result<RenderResponse, RenderFailure> {
        let response = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/pdf")
            .body(zpl.to_owned())
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    RenderFailure::Fatal(format!("cannot build request: {e}"))
                } else if e.is_timeout() {
                    RenderFailure::Transport(format!("request timed out: {e}"))
                } else {
                    RenderFailure::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RenderFailure::Transport(format!("failed to read body: {e}")))?;

        if status == STATUS_OK && !body.starts_with(PDF_MAGIC) {
            let mut magic = [0u8; 4];
            let n = body.len().min(4);
            magic[..n].copy_from_slice(&body[..n]);
            return Err(RenderFailure::Transport(format!(
                "response is not a PDF (first bytes: {magic:?})"
            )));
        }

        debug!("Labelary answered {} ({} bytes)", status, body.len());
        Ok(RenderResponse {
            status,
            body: body.to_vec(),
        })
    }
}
