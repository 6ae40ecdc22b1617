//! Attachment encoding for `--attach` and inline `/attach` directives.
//!
//! Text files are inlined as an extra text part up to a size limit.
//! Supported binary types (images, PDF) become file references with the
//! detected MIME type; everything else is rejected.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cagent_core::session::Part;

/// Inline size limit for text attachments.
const MAX_INLINE_BYTES: u64 = 256 * 1024;

/// Strip inline `/attach <path>` directives out of a prompt, returning the
/// cleaned prompt and the referenced paths.
pub fn extract_inline(prompt: &str) -> (String, Vec<PathBuf>) {
    let mut cleaned = Vec::new();
    let mut paths = Vec::new();

    for line in prompt.lines() {
        match line.trim().strip_prefix("/attach ") {
            Some(path) if !path.trim().is_empty() => paths.push(PathBuf::from(path.trim())),
            _ => cleaned.push(line),
        }
    }

    (cleaned.join("\n"), paths)
}

/// Encode attachment paths as message parts.
pub fn build_parts(paths: &[PathBuf]) -> Result<Vec<Part>> {
    paths.iter().map(|p| encode(p)).collect()
}

fn encode(path: &Path) -> Result<Part> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("cannot attach {}", path.display()))?;

    if let Some(media_type) = binary_media_type(path) {
        let part = if media_type.starts_with("image/") {
            Part::ImageRef {
                path: path.display().to_string(),
                media_type: media_type.to_string(),
            }
        } else {
            Part::FileRef {
                path: path.display().to_string(),
                media_type: media_type.to_string(),
            }
        };
        return Ok(part);
    }

    if metadata.len() > MAX_INLINE_BYTES {
        anyhow::bail!(
            "attachment {} is {} bytes; text attachments are limited to {} bytes",
            path.display(),
            metadata.len(),
            MAX_INLINE_BYTES
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("{} is neither text nor a supported binary type", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Part::Text {
        text: format!("[attachment: {name}]\n{content}"),
    })
}

fn binary_media_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}
