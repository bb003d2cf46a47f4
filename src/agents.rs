//! The capture surfaces: the page agent, the privileged background agent,
//! and the popup.
//!
//! ```text
//!  PageAgent ──SaveHighlight──▶ BackgroundAgent ──▶ CaptureClient ──▶ API
//!      ▲                              │
//!      └──GetSelection / ShowNotification (context-menu flow)
//! ```
//!
//! Only the background agent and the popup ever touch credentials; the
//! page agent reaches the API exclusively through the [`Messenger`]. Every
//! user-triggered action ends in exactly one status message, except the
//! context-menu flow on an empty selection, which does nothing.

use async_trait::async_trait;
use std::sync::Arc;

use crate::capture::CaptureClient;
use crate::config::SettingsStore;
use crate::messenger::{channel, serve, MessageHandler, Messenger, Request, Response};
use crate::models::CaptureRecord;
use crate::notifier::{BannerNotifier, NoticeKind, Notifier, StderrSurface};
use crate::selector::SelectionSource;

pub const SELECTION_SAVED: &str = "Selection saved to ZgrWise!";
pub const SELECTION_FAILED: &str = "Failed to save selection";
pub const NO_SELECTION: &str = "No text selected";
pub const NOT_CONFIGURED: &str = "Please configure API settings";

/// How a user-triggered capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Saved(String),
    Failed(String),
    NothingSelected,
    NotConfigured,
}

impl ActionOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, ActionOutcome::Saved(_))
    }
}

/// Page-side agent. Reads the page and shows notifications; never holds
/// credentials.
pub struct PageAgent {
    page: Arc<dyn SelectionSource>,
    notifier: Arc<dyn Notifier>,
    background: Arc<dyn Messenger>,
}

impl PageAgent {
    pub fn new(
        page: Arc<dyn SelectionSource>,
        notifier: Arc<dyn Notifier>,
        background: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            page,
            notifier,
            background,
        }
    }

    /// Keyboard-shortcut flow: save the current selection via the
    /// background agent.
    pub async fn shortcut_save(&self) -> ActionOutcome {
        let record = self.page.read();
        if !record.has_selection() {
            self.notifier.show(NO_SELECTION, NoticeKind::Success);
            return ActionOutcome::NothingSelected;
        }
        if let Some(range) = self.page.selection() {
            self.notifier.flash(&range);
        }

        match self.background.save_highlight(record).await {
            Ok(reply) if reply.success => {
                self.notifier.show(SELECTION_SAVED, NoticeKind::Success);
                ActionOutcome::Saved(reply.message.unwrap_or_default())
            }
            Ok(reply) => {
                self.notifier.show(SELECTION_FAILED, NoticeKind::Error);
                ActionOutcome::Failed(reply.error.unwrap_or_default())
            }
            Err(e) => {
                tracing::error!("save request failed: {}", e);
                self.notifier.show(SELECTION_FAILED, NoticeKind::Error);
                ActionOutcome::Failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for PageAgent {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetSelection => Response::Selection(self.page.read()),
            Request::ShowNotification { message, kind } => {
                self.notifier.show(&message, kind);
                Response::Ack
            }
            other => Response::Unhandled(other.action()),
        }
    }
}

/// Privileged agent: answers save requests with the capture client.
pub struct BackgroundAgent {
    capture: Arc<CaptureClient>,
}

impl BackgroundAgent {
    pub fn new(capture: Arc<CaptureClient>) -> Self {
        Self { capture }
    }

    /// Context-menu flow: ask the page for its selection, save it, and
    /// tell the page how it went.
    pub async fn context_menu_save(&self, page: &dyn Messenger) -> ActionOutcome {
        let record = match page.get_selection().await {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("page did not answer getSelection: {}", e);
                return ActionOutcome::NothingSelected;
            }
        };
        if !record.has_selection() {
            return ActionOutcome::NothingSelected;
        }

        let reply = self.capture.handle(&record).await;
        let (message, kind) = if reply.success {
            (SELECTION_SAVED, NoticeKind::Success)
        } else {
            (SELECTION_FAILED, NoticeKind::Error)
        };
        if let Err(e) = page.show_notification(message, kind).await {
            tracing::debug!("could not notify page: {}", e);
        }

        if reply.success {
            ActionOutcome::Saved(reply.message.unwrap_or_default())
        } else {
            ActionOutcome::Failed(reply.error.unwrap_or_default())
        }
    }
}

#[async_trait]
impl MessageHandler for BackgroundAgent {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::SaveHighlight { data } => Response::Saved(self.capture.handle(&data).await),
            other => Response::Unhandled(other.action()),
        }
    }
}

/// Popup surface. Talks to the capture client directly and reports in
/// its own status line.
pub struct Popup {
    settings: Arc<dyn SettingsStore>,
    page: Arc<dyn SelectionSource>,
    capture: Arc<CaptureClient>,
    status: Arc<dyn Notifier>,
}

impl Popup {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        page: Arc<dyn SelectionSource>,
        capture: Arc<CaptureClient>,
        status: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            page,
            capture,
            status,
        }
    }

    /// Whether credentials are present. Shows a status message if not.
    pub fn check_settings(&self) -> bool {
        match self.settings.load() {
            Ok(s) if s.api_credentials().is_some() => true,
            Ok(_) => {
                self.status.show(NOT_CONFIGURED, NoticeKind::Error);
                false
            }
            Err(e) => {
                tracing::error!("error checking settings: {:#}", e);
                self.status.show("Error checking settings", NoticeKind::Error);
                false
            }
        }
    }

    /// Save the page as a source, ignoring any selection.
    pub async fn save_page(&self) -> ActionOutcome {
        if !self.check_settings() {
            return ActionOutcome::NotConfigured;
        }
        let record = CaptureRecord {
            selection_text: String::new(),
            surrounding_context: None,
            ..self.page.read()
        };
        self.save(&record, "Page saved successfully!", "Failed to save page")
            .await
    }

    /// Save the page and the current selection as a highlight.
    pub async fn save_selection(&self) -> ActionOutcome {
        if !self.check_settings() {
            return ActionOutcome::NotConfigured;
        }
        let record = self.page.read();
        if !record.has_selection() {
            self.status.show(NO_SELECTION, NoticeKind::Error);
            return ActionOutcome::NothingSelected;
        }
        self.save(&record, "Selection saved successfully!", SELECTION_FAILED)
            .await
    }

    async fn save(&self, record: &CaptureRecord, saved: &str, failed: &str) -> ActionOutcome {
        match self.capture.save_highlight(record).await {
            Ok(outcome) => {
                self.status.show(saved, NoticeKind::Success);
                ActionOutcome::Saved(outcome.message().to_string())
            }
            Err(e) => {
                tracing::error!("error saving to ZgrWise: {}", e);
                self.status.show(failed, NoticeKind::Error);
                ActionOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Wire the agents for a one-shot capture from the command line: the page
/// agent talks to a background agent over a channel, exactly as the two
/// halves talk in a browser. A record without a selection goes through the
/// popup's save-page flow instead.
pub async fn run_capture_action(
    settings: Arc<dyn SettingsStore>,
    page: Arc<dyn SelectionSource>,
) -> anyhow::Result<ActionOutcome> {
    let timing = settings.load()?.notifier;
    let notifier: Arc<dyn Notifier> =
        Arc::new(BannerNotifier::new(Arc::new(StderrSurface), timing));
    let capture = Arc::new(CaptureClient::new(Arc::clone(&settings)));

    let outcome = if page.read().has_selection() {
        let (messenger, inbox) = channel(1);
        let background = BackgroundAgent::new(Arc::clone(&capture));
        let server = tokio::spawn(async move { serve(inbox, &background).await });

        let agent = PageAgent::new(page, notifier, Arc::new(messenger));
        let outcome = agent.shortcut_save().await;
        drop(agent);
        server.await?;
        outcome
    } else {
        Popup::new(settings, page, capture, notifier).save_page().await
    };

    match &outcome {
        ActionOutcome::Saved(message) => println!("{}", message),
        ActionOutcome::Failed(error) => anyhow::bail!("{}", error),
        ActionOutcome::NothingSelected => anyhow::bail!(NO_SELECTION),
        ActionOutcome::NotConfigured => anyhow::bail!("API settings not configured"),
    }
    Ok(outcome)
}
