//! The one user-visible notice a vault sync run ends with.
//!
//! Notices go to **stderr** so stdout remains parseable for scripts:
//! human-readable by default on a TTY, one JSON object per line with
//! `--notice json`, or nothing at all.

use chrono::Utc;
use std::io::Write;
use std::sync::Mutex;

/// Outcome of one `pull`, reported exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncNotice {
    Synced {
        count: usize,
        created: usize,
        skipped: usize,
        failed: usize,
    },
    Failed {
        error: String,
    },
}

impl SyncNotice {
    pub fn message(&self) -> String {
        match self {
            SyncNotice::Synced { count, .. } => {
                format!("Successfully synced {} highlights from ZgrWise", count)
            }
            SyncNotice::Failed { error } => format!("Error syncing highlights: {}", error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyncNotice::Failed { .. })
    }
}

/// Receives the end-of-run notice.
pub trait NoticeSink: Send + Sync {
    fn notice(&self, notice: &SyncNotice);
}

/// Human-friendly notice on stderr.
pub struct StderrNotice;

impl NoticeSink for StderrNotice {
    fn notice(&self, notice: &SyncNotice) {
        let line = match notice {
            SyncNotice::Synced {
                created,
                skipped,
                failed,
                ..
            } => {
                let mut detail = format!(
                    "{} new, {} already present",
                    format_number(*created as u64),
                    format_number(*skipped as u64)
                );
                if *failed > 0 {
                    detail.push_str(&format!(", {} failed", format_number(*failed as u64)));
                }
                format!("{} ({})\n", notice.message(), detail)
            }
            SyncNotice::Failed { .. } => format!("{}\n", notice.message()),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable notice: one JSON object per line on stderr.
pub struct JsonNotice;

impl NoticeSink for JsonNotice {
    fn notice(&self, notice: &SyncNotice) {
        let at = Utc::now().to_rfc3339();
        let obj = match notice {
            SyncNotice::Synced {
                count,
                created,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "notice",
                "status": "ok",
                "synced": count,
                "created": created,
                "skipped": skipped,
                "failed": failed,
                "message": notice.message(),
                "at": at,
            }),
            SyncNotice::Failed { error } => serde_json::json!({
                "event": "notice",
                "status": "error",
                "error": error,
                "message": notice.message(),
                "at": at,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op sink when notices are disabled.
pub struct NoNotice;

impl NoticeSink for NoNotice {
    fn notice(&self, _notice: &SyncNotice) {}
}

/// Keeps every notice it receives. For embedding hosts and tests.
#[derive(Default)]
pub struct CollectingNotice {
    seen: Mutex<Vec<SyncNotice>>,
}

impl CollectingNotice {
    pub fn notices(&self) -> Vec<SyncNotice> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NoticeSink for CollectingNotice {
    fn notice(&self, notice: &SyncNotice) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notice.clone());
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Notice mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum NoticeMode {
    Off,
    Human,
    Json,
}

impl NoticeMode {
    /// Human notices when stderr is a TTY, JSON otherwise.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            NoticeMode::Human
        } else {
            NoticeMode::Json
        }
    }

    pub fn sink(&self) -> Box<dyn NoticeSink> {
        match self {
            NoticeMode::Off => Box::new(NoNotice),
            NoticeMode::Human => Box::new(StderrNotice),
            NoticeMode::Json => Box::new(JsonNotice),
        }
    }
}
