//! Shared helpers for the offline integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zpl2pdf::{
    ConversionConfig, LabelRenderer, PageMerger, RenderFailure, RenderResponse, ZplError,
};

/// How the fake renderer answers for a label containing a given marker.
#[derive(Clone, Copy, Debug)]
pub enum Behaviour {
    /// Always 200 with the label text as the "page".
    Render,
    /// Always the given HTTP status.
    Status(u16),
    /// Fail with `n` responses of the status first, then render.
    FlakyThenRender(u16, usize),
    /// Always a transport error.
    Transport,
}

/// Renderer whose answers are keyed by a marker found in the ZPL.
///
/// Labels that match no marker render. Every call is counted per label text.
#[derive(Default)]
pub struct FakeRenderer {
    rules: Vec<(String, Behaviour)>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, marker: &str, behaviour: Behaviour) -> Self {
        self.rules.push((marker.to_string(), behaviour));
        self
    }

    pub fn calls_for(&self, marker: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(zpl, _)| zpl.contains(marker))
            .map(|(_, n)| *n)
            .sum()
    }
}

#[async_trait]
impl LabelRenderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn render(&self, zpl: &str) -> Result<RenderResponse, RenderFailure> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(zpl.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        let behaviour = self
            .rules
            .iter()
            .find(|(marker, _)| zpl.contains(marker.as_str()))
            .map(|(_, b)| *b)
            .unwrap_or(Behaviour::Render);

        match behaviour {
            Behaviour::Render => Ok(RenderResponse::ok(zpl.as_bytes().to_vec())),
            Behaviour::Status(code) => Ok(RenderResponse::status(code)),
            Behaviour::FlakyThenRender(code, n) if call <= n => Ok(RenderResponse::status(code)),
            Behaviour::FlakyThenRender(..) => Ok(RenderResponse::ok(zpl.as_bytes().to_vec())),
            Behaviour::Transport => Err(RenderFailure::Transport("connection refused".into())),
        }
    }
}

/// Joins pages with a form feed so page order is visible in the output.
pub struct ConcatMerger;

impl PageMerger for ConcatMerger {
    fn merge(&self, pages: &[Vec<u8>]) -> Result<Vec<u8>, ZplError> {
        Ok(pages.join(&b'\x0c'))
    }
}

/// Split a merged "PDF" from [`ConcatMerger`] back into page texts.
pub fn pages_of(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == b'\x0c')
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

/// Config with zero pacing, short backoffs, and the fakes wired in.
pub fn test_config(renderer: Arc<FakeRenderer>, output_dir: &Path) -> ConversionConfig {
    ConversionConfig::builder()
        .renderer(renderer)
        .merger(Arc::new(ConcatMerger))
        .unit_pacing(Duration::ZERO)
        .rate_limit_backoff(Duration::from_millis(1))
        .transport_backoff(Duration::from_millis(1))
        .output_dir(output_dir)
        .build()
        .expect("valid test config")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("zpl2pdf=debug"))
        .with_test_writer()
        .try_init();
}
