//! Frontmatter codec.
//!
//! A document on disk is an optional leading YAML block fenced by `---` lines, followed by the
//! free-text body. Metadata keeps insertion order in both directions so re-encoding an
//! unchanged document produces no diff.

use serde_json::Value;

use crate::errors::AppError;
use crate::models::Metadata;

const DELIMITER: &str = "---";
/// YAML document-end marker, accepted as an alternative closing fence.
const END_MARKER: &str = "...";

/// A decoded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub metadata: Metadata,
    pub body: String,
}

/// Split raw file content into metadata and body.
///
/// Content without a leading fence is all body. A fence that is never closed, or whose block
/// is not a YAML mapping, is a [`AppError::MalformedDocument`].
pub fn decode(raw: &str) -> Result<Document, AppError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let Some(rest) = strip_opening_fence(raw) else {
        return Ok(Document {
            metadata: Metadata::new(),
            body: raw.to_string(),
        });
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == DELIMITER || trimmed == END_MARKER {
            let metadata = parse_block(&rest[..offset])?;
            let body = rest[offset + line.len()..].to_string();
            return Ok(Document { metadata, body });
        }
        offset += line.len();
    }

    Err(AppError::MalformedDocument(
        "Frontmatter block is not closed".to_string(),
    ))
}

/// Render metadata and body back into file content.
pub fn encode(metadata: &Metadata, body: &str) -> Result<String, AppError> {
    let mut block = if metadata.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(metadata)
            .map_err(|e| AppError::Internal(format!("Failed to serialize frontmatter: {}", e)))?
    };
    if !block.is_empty() && !block.ends_with('\n') {
        block.push('\n');
    }

    Ok(format!("{DELIMITER}\n{block}{DELIMITER}\n{body}"))
}

fn strip_opening_fence(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(DELIMITER)?;
    rest.strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
}

fn parse_block(block: &str) -> Result<Metadata, AppError> {
    if block.trim().is_empty() {
        return Ok(Metadata::new());
    }

    match serde_yaml::from_str::<Value>(block)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        other => Err(AppError::MalformedDocument(format!(
            "Frontmatter must be a mapping, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
