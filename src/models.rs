//! Core data models shared by the capture path and the vault sync path.
//!
//! [`CaptureRecord`] flows from the page to the privileged agent. The
//! remaining types mirror the JSON bodies exchanged with the ZgrWise API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of characters of enclosing element text kept as context.
pub const CONTEXT_MAX_CHARS: usize = 500;

/// What the Selector produced for one capture action.
///
/// Created once per capture and consumed once by the capture client.
/// `selection_text` is empty when nothing is selected; the page fields
/// are always filled so a page-only save can still go through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub selection_text: String,
    pub page_title: String,
    pub page_url: String,
    pub page_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surrounding_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CaptureRecord {
    pub fn has_selection(&self) -> bool {
        !self.selection_text.is_empty()
    }
}

/// Identifier assigned by the API. Accepts both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Int(n) => write!(f, "{}", n),
            RemoteId::Text(s) => f.write_str(s),
        }
    }
}

/// Body of `POST /api/sources`.
#[derive(Debug, Clone, Serialize)]
pub struct NewSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: String,
    pub origin: String,
    pub title: String,
    pub raw: String,
}

/// The part of a created (or already existing) source the client relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSource {
    pub id: RemoteId,
}

/// Body of `POST /api/highlights`.
#[derive(Debug, Clone, Serialize)]
pub struct NewHighlight {
    pub source_id: RemoteId,
    pub text: String,
    pub note: String,
    pub location: String,
}

/// A highlight as returned by `GET /api/highlights`, with its source inlined.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteHighlight {
    pub id: RemoteId,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub source: RemoteSource,
}

/// Source metadata embedded in a [`RemoteHighlight`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSource {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub raw: Option<String>,
}

/// The single reply sent back across the messenger for a save request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}
