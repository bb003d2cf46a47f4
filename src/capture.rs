//! The privileged capture client: owns the API credentials and runs the
//! two-step write protocol.
//!
//! ```text
//! settings ──▶ POST /api/sources ──▶ source.id ──▶ POST /api/highlights
//!   (fresh)        (always)                         (only with a selection)
//! ```
//!
//! Steps run strictly in order with no retries. A failure at the highlight
//! step leaves the already created source in place: the API offers no way
//! to delete it from here, so the error is reported and nothing is rolled
//! back. Repeating a capture creates another source; deduplication is the
//! server's business.

use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::config::SettingsStore;
use crate::models::{CaptureRecord, NewHighlight, NewSource, RemoteId, SaveReply};

/// Which remote write a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Highlight,
    Health,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Source => "source",
            Stage::Highlight => "highlight",
            Stage::Health => "health check",
        })
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// `apiBase` or `apiKey` is missing. No request was made.
    #[error("API settings not configured")]
    Configuration,

    /// The settings store itself could not be read.
    #[error("Failed to read settings: {0}")]
    Settings(String),

    /// The server answered with a non-2xx status.
    #[error("{}", rejection_message(.stage, .status))]
    Rejected { stage: Stage, status: StatusCode },

    /// The request never completed, or the reply could not be decoded.
    #[error("{source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },
}

fn rejection_message(stage: &Stage, status: &StatusCode) -> String {
    match stage {
        Stage::Health => format!("Connection failed: {}", status),
        other => format!("Failed to create {}", other),
    }
}

impl CaptureError {
    fn at(stage: Stage, err: ApiError) -> Self {
        match err {
            ApiError::Status { status, .. } => CaptureError::Rejected { stage, status },
            ApiError::Transport(source) => CaptureError::Transport { stage, source },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            CaptureError::Rejected { stage, .. } | CaptureError::Transport { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// True when the source was written but the highlight was not.
    pub fn is_partial_effect(&self) -> bool {
        self.stage() == Some(Stage::Highlight)
    }
}

/// Result of a completed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub source_id: RemoteId,
    pub highlight_created: bool,
}

impl SaveOutcome {
    pub fn message(&self) -> &'static str {
        if self.highlight_created {
            "Highlight saved successfully!"
        } else {
            "Page saved successfully!"
        }
    }
}

pub struct CaptureClient {
    settings: Arc<dyn SettingsStore>,
}

impl CaptureClient {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    /// Settings are read on every call so edits between captures apply.
    fn client(&self) -> Result<ApiClient, CaptureError> {
        let settings = self
            .settings
            .load()
            .map_err(|e| CaptureError::Settings(format!("{:#}", e)))?;
        let credentials = settings
            .api_credentials()
            .ok_or(CaptureError::Configuration)?;
        ApiClient::new(&credentials, settings.http.timeout_secs)
            .map_err(|e| CaptureError::at(Stage::Source, e))
    }

    /// Run the write protocol for one capture.
    pub async fn save_highlight(&self, data: &CaptureRecord) -> Result<SaveOutcome, CaptureError> {
        let api = self.client()?;

        let source = NewSource {
            source_type: "web".to_string(),
            url: data.page_url.clone(),
            origin: origin_of(&data.page_url),
            title: data.page_title.clone(),
            raw: data.page_content.clone(),
        };
        let created = api
            .create_source(&source)
            .await
            .map_err(|e| CaptureError::at(Stage::Source, e))?;

        if !data.has_selection() {
            return Ok(SaveOutcome {
                source_id: created.id,
                highlight_created: false,
            });
        }

        let highlight = NewHighlight {
            source_id: created.id.clone(),
            text: data.selection_text.clone(),
            note: data.note.clone().unwrap_or_default(),
            location: data.location.clone().unwrap_or_default(),
        };
        api.create_highlight(&highlight)
            .await
            .map_err(|e| CaptureError::at(Stage::Highlight, e))?;

        Ok(SaveOutcome {
            source_id: created.id,
            highlight_created: true,
        })
    }

    /// Messenger-facing entry point: every outcome becomes a [`SaveReply`].
    pub async fn handle(&self, data: &CaptureRecord) -> SaveReply {
        match self.save_highlight(data).await {
            Ok(outcome) => SaveReply::ok(outcome.message()),
            Err(e) => {
                if e.is_partial_effect() {
                    tracing::error!("source saved but highlight was not: {}", e);
                } else {
                    tracing::error!("error saving highlight: {}", e);
                }
                SaveReply::failed(e.to_string())
            }
        }
    }

    /// `GET /health` with the stored credentials.
    pub async fn check_connection(&self) -> Result<(), CaptureError> {
        let api = self.client()?;
        api.health()
            .await
            .map_err(|e| CaptureError::at(Stage::Health, e))
    }
}

/// `zgw check`: report whether the API answers with the stored key.
pub async fn run_check(settings: Arc<dyn SettingsStore>) -> anyhow::Result<()> {
    let client = CaptureClient::new(settings);
    match client.check_connection().await {
        Ok(()) => {
            println!("Connection successful! API is responding.");
            Ok(())
        }
        Err(CaptureError::Configuration) => {
            anyhow::bail!("Please fill in both API Base URL and API Key")
        }
        Err(e @ CaptureError::Rejected { .. }) => Err(e.into()),
        Err(e) => anyhow::bail!("Connection failed: {}", e),
    }
}

/// Hostname of `url`, or an empty string when there is none.
pub fn origin_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
