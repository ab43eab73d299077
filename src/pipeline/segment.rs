//! Label segmentation: split a ZPL blob into independently renderable units.
//!
//! Two conventions show up in real label exports:
//!
//! * **Self-contained** blocks — every `^XA … ^XZ` carries its own graphics
//!   (inline `^GFA`) or no graphics at all. Each block is one unit.
//! * **Split graphics** — a `~DGR` download directive and the label that
//!   recalls the stored image arrive as two separate `… ^XZ` blocks. The
//!   renderer only sees one request at a time, so the halves must be glued
//!   back together before sending.
//!
//! Only the markers `^XA`, `^XZ`, `^GFA` and `~DGR` are inspected; label
//! drawing commands are never parsed.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Start-of-label marker.
pub const START_MARKER: &str = "^XA";
/// End-of-label marker.
pub const END_MARKER: &str = "^XZ";
/// Inline graphic field.
pub const GRAPHIC_FIELD_MARKER: &str = "^GFA";
/// Download-graphics directive.
pub const DOWNLOAD_GRAPHIC_MARKER: &str = "~DGR";

/// Fragments whose trimmed length is at or below this are noise.
const MIN_FRAGMENT_CHARS: usize = 5;

static LABEL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\^XA.*?\^XZ").expect("label block regex is valid"));

/// One logical label of raw ZPL, ready to be sent to the renderer.
///
/// Immutable once produced; clones share the same buffer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LabelUnit(Arc<str>);

impl LabelUnit {
    pub fn new(zpl: impl Into<Arc<str>>) -> Self {
        Self(zpl.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for LabelUnit {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LabelUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.0.chars().take(24).collect();
        f.debug_tuple("LabelUnit")
            .field(&format_args!("{preview:?}… ({} bytes)", self.0.len()))
            .finish()
    }
}

impl From<&str> for LabelUnit {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LabelUnit {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Which grouping rule applies to a blob of ZPL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// No `^XA … ^XZ` block at all.
    None,
    /// Each extracted block is already a complete label.
    SelfContained,
    /// `~DGR` downloads and their labels arrive as separate blocks.
    SplitGraphics,
}

/// Decide the grouping rule from the first extracted block and the whole input.
pub fn detect_dialect(raw: &str) -> Dialect {
    match LABEL_BLOCK.find(raw) {
        None => Dialect::None,
        Some(first) => classify(first.as_str(), raw),
    }
}

fn classify(first: &str, raw: &str) -> Dialect {
    let first_is_complete = first.contains(GRAPHIC_FIELD_MARKER)
        || (first.contains(DOWNLOAD_GRAPHIC_MARKER) && first.contains(START_MARKER));

    if first_is_complete || !raw.contains(DOWNLOAD_GRAPHIC_MARKER) {
        Dialect::SelfContained
    } else {
        Dialect::SplitGraphics
    }
}

/// Split `raw` into ordered label units.
///
/// Never fails: input without any `^XA … ^XZ` block yields an empty vector.
pub fn segment(raw: &str) -> Vec<LabelUnit> {
    let blocks: Vec<&str> = LABEL_BLOCK.find_iter(raw).map(|m| m.as_str()).collect();
    let Some(first) = blocks.first() else {
        return Vec::new();
    };

    match classify(first, raw) {
        Dialect::SplitGraphics => pair_fragments(raw),
        _ => blocks.into_iter().map(LabelUnit::from).collect(),
    }
}

/// Re-split on `^XZ` and join consecutive fragments two by two.
fn pair_fragments(raw: &str) -> Vec<LabelUnit> {
    let fragments: Vec<String> = raw
        .split(END_MARKER)
        .filter(|part| part.trim().chars().count() > MIN_FRAGMENT_CHARS)
        .map(|part| format!("{part}{END_MARKER}"))
        .collect();

    fragments
        .chunks(2)
        .map(|pair| match pair {
            [download, label] => LabelUnit::from(format!("{download}\n{label}")),
            rest => LabelUnit::from(rest.concat()),
        })
        .collect()
}
