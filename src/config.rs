//! Configuration types for ZPL-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The HTTP service adds its own
//! [`ServerSettings`] on top.

use crate::error::ZplError;
use crate::pipeline::assemble::PageMerger;
use crate::pipeline::render::{LabelRenderer, RetryPolicy};
use crate::progress::ProgressCallback;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where and how labels are rendered.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LabelaryEndpoint {
    /// API root, without trailing slash. Default: `http://api.labelary.com/v1`.
    pub base_url: String,
    /// Print density in dots per millimetre (6, 8, 12 or 24). Default: 8.
    pub dpmm: u8,
    /// Label width in inches. Default: 4.
    pub width_in: f32,
    /// Label height in inches. Default: 6.
    pub height_in: f32,
    /// Index of the label to render when a unit contains several. Default: 0.
    pub index: u32,
}

impl Default for LabelaryEndpoint {
    fn default() -> Self {
        Self {
            base_url: "http://api.labelary.com/v1".to_string(),
            dpmm: 8,
            width_in: 4.0,
            height_in: 6.0,
            index: 0,
        }
    }
}

impl LabelaryEndpoint {
    /// Full URL for a single render request.
    pub fn render_url(&self) -> String {
        format!(
            "{}/printers/{}dpmm/labels/{}x{}/{}/",
            self.base_url.trim_end_matches('/'),
            self.dpmm,
            self.width_in,
            self.height_in,
            self.index
        )
    }
}

/// Configuration for a ZPL-to-PDF conversion.
///
/// # Example
/// ```rust
/// use zpl2pdf::ConversionConfig;
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .dpmm(12)
///     .label_size(4.0, 3.0)
///     .unit_pacing(Duration::from_millis(250))
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoint.dpmm, 12);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering endpoint and label geometry.
    pub endpoint: LabelaryEndpoint,

    /// Pre-constructed renderer. Takes precedence over `endpoint`.
    pub renderer: Option<Arc<dyn LabelRenderer>>,

    /// Pre-constructed page merger. Default: pdfium.
    pub merger: Option<Arc<dyn PageMerger>>,

    /// Explicit pdfium library path for the default merger.
    /// Falls back to `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Per-unit retry budget and waits. Default: 3 attempts, 3 s / 2 s.
    pub retry: RetryPolicy,

    /// Fixed delay after every unit, success or failure. Default: 500 ms.
    ///
    /// Keeps a long batch from tripping the renderer's rate limiter.
    pub unit_pacing: Duration,

    /// Per-request timeout in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Submissions shorter than this many characters are rejected. Default: 10.
    pub min_content_len: usize,

    /// Directory that receives merged PDFs. Default: `downloads`.
    pub output_dir: PathBuf,

    /// Progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            endpoint: LabelaryEndpoint::default(),
            renderer: None,
            merger: None,
            pdfium_lib_path: None,
            retry: RetryPolicy::default(),
            unit_pacing: Duration::from_millis(500),
            request_timeout_secs: 30,
            min_content_len: 10,
            output_dir: PathBuf::from("downloads"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("endpoint", &self.endpoint)
            .field("renderer", &self.renderer.as_ref().map(|r| r.name().to_string()))
            .field("merger", &self.merger.as_ref().map(|_| "<dyn PageMerger>"))
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("retry", &self.retry)
            .field("unit_pacing", &self.unit_pacing)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("min_content_len", &self.min_content_len)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.base_url = url.into();
        self
    }

    pub fn dpmm(mut self, dpmm: u8) -> Self {
        self.config.endpoint.dpmm = dpmm;
        self
    }

    pub fn label_size(mut self, width_in: f32, height_in: f32) -> Self {
        self.config.endpoint.width_in = width_in;
        self.config.endpoint.height_in = height_in;
        self
    }

    pub fn label_index(mut self, index: u32) -> Self {
        self.config.endpoint.index = index;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn LabelRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn merger(mut self, merger: Arc<dyn PageMerger>) -> Self {
        self.config.merger = Some(merger);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn rate_limit_backoff(mut self, wait: Duration) -> Self {
        self.config.retry.rate_limit_backoff = wait;
        self
    }

    pub fn transport_backoff(mut self, wait: Duration) -> Self {
        self.config.retry.transport_backoff = wait;
        self
    }

    pub fn unit_pacing(mut self, wait: Duration) -> Self {
        self.config.unit_pacing = wait;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn min_content_len(mut self, n: usize) -> Self {
        self.config.min_content_len = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ZplError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(ZplError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if ![6, 8, 12, 24].contains(&c.endpoint.dpmm) {
            return Err(ZplError::InvalidConfig(format!(
                "dpmm must be one of 6, 8, 12, 24, got {}",
                c.endpoint.dpmm
            )));
        }
        if !(c.endpoint.width_in > 0.0 && c.endpoint.height_in > 0.0) {
            return Err(ZplError::InvalidConfig(format!(
                "label size must be positive, got {}x{}",
                c.endpoint.width_in, c.endpoint.height_in
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(ZplError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.renderer.is_none() {
            reqwest::Url::parse(&c.endpoint.render_url()).map_err(|e| {
                ZplError::InvalidConfig(format!(
                    "Invalid render endpoint '{}': {e}",
                    c.endpoint.base_url
                ))
            })?;
        }
        Ok(self.config)
    }
}

/// Settings for `zpl2pdf serve`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen address. Default: `127.0.0.1:5000`.
    pub bind: SocketAddr,
    /// Batches converting at the same time. Default: 4.
    pub max_concurrent_jobs: usize,
    /// Drop finished job records and artifacts older than this.
    /// `None` keeps everything.
    pub retention: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_concurrent_jobs: 4,
            retention: None,
        }
    }
}
