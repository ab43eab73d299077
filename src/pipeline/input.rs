//! Input resolution: turn a submission into ZPL text plus a name hint.
//!
//! Submissions arrive three ways: pasted text, a plain `.zpl`/`.txt` upload,
//! or a `.zip` with the markup inside. Exports from label software are not
//! always UTF-8, so uploads and archive members fall back to Latin-1 rather
//! than failing.

use crate::error::ZplError;
use crate::pipeline::assemble::sanitize_name;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name hint used when the submitter gave no file name.
pub const DEFAULT_NAME: &str = "labels";

/// Member extensions preferred when picking a file out of a ZIP.
const PREFERRED_MEMBER_EXTENSIONS: [&str; 2] = [".txt", ".zpl"];

/// Largest decompressed ZIP member accepted.
pub const MAX_MEMBER_BYTES: u64 = 64 * 1024 * 1024;

/// Raw submission as received from the web layer or the CLI.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Markup pasted into a form field.
    Text(String),
    /// An uploaded file.
    File { filename: String, bytes: Vec<u8> },
}

/// Decoded submission content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionText {
    pub text: String,
    /// Sanitized base name for the merged PDF.
    pub name: String,
}

/// Decode a submission and apply the minimum-length check.
pub fn read_submission(
    submission: Submission,
    min_content_len: usize,
) -> Result<SubmissionText, ZplError> {
    let (text, name) = match submission {
        Submission::Text(text) => (text, DEFAULT_NAME.to_string()),
        Submission::File { filename, bytes } => {
            if filename.is_empty() && bytes.is_empty() {
                return Err(ZplError::EmptySubmission);
            }
            let name = file_stem(&filename);
            let text = if has_extension(&filename, ".zip") {
                read_zip(&filename, &bytes, MAX_MEMBER_BYTES)?
            } else {
                decode_text(&bytes)
            };
            (text, name)
        }
    };

    if text.is_empty() {
        return Err(ZplError::EmptySubmission);
    }

    let len = text.chars().count();
    if len < min_content_len {
        return Err(ZplError::ContentTooShort {
            len,
            min: min_content_len,
        });
    }

    debug!("Read submission '{}' ({} chars)", name, len);
    Ok(SubmissionText {
        text,
        name: sanitize_name(&name),
    })
}

/// Read a local file into a [`Submission`].
pub async fn load_file(path: &Path) -> Result<Submission, ZplError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ZplError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ZplError::ReadFailed {
                path: PathBuf::from(path),
                source: e,
            }
        }
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(Submission::File { filename, bytes })
}

/// UTF-8, or Latin-1 when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            debug!("Upload is not UTF-8; decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

/// Pick the first `.txt`/`.zpl` member (else the first member) and decode it.
///
/// The member is read through a cap of `max_member_bytes`; the size in the
/// archive header is not trusted.
fn read_zip(filename: &str, bytes: &[u8], max_member_bytes: u64) -> Result<String, ZplError> {
    let invalid = |reason: String| ZplError::InvalidArchive {
        filename: filename.to_string(),
        reason,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let target = names
        .iter()
        .find(|n| {
            PREFERRED_MEMBER_EXTENSIONS
                .iter()
                .any(|ext| has_extension(n, ext))
        })
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| invalid("archive is empty".to_string()))?;

    let mut member = archive
        .by_name(&target)
        .map_err(|e| invalid(format!("{target}: {e}")))?;
    let too_large = || {
        invalid(format!(
            "{target}: decompressed size exceeds {max_member_bytes} bytes"
        ))
    };
    if member.size() > max_member_bytes {
        return Err(too_large());
    }

    let mut raw = Vec::new();
    member
        .by_ref()
        .take(max_member_bytes + 1)
        .read_to_end(&mut raw)
        .map_err(|e| invalid(format!("{target}: {e}")))?;
    if raw.len() as u64 > max_member_bytes {
        return Err(too_large());
    }

    debug!("Using archive member '{}' ({} bytes)", target, raw.len());
    Ok(decode_text(&raw))
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.to_ascii_lowercase().ends_with(ext)
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}
