//! One-way pull of remote highlights into a local note vault.
//!
//! Each highlight becomes one Markdown file named `{id}_{slug}.md`, where
//! the slug is the first 50 characters of the highlight text with every
//! non-alphanumeric character replaced by `_`. In the id part, ASCII
//! alphanumerics are kept and every other byte is written as `-xx`, so two
//! ids never share a file name and the id never contains `_`. The id is the
//! sync key: a file whose name has the same id before its first `_` counts
//! as the materialized copy of that highlight even if the remote text
//! changed since, so at most one file is ever created per id. Files are created
//! with create-new semantics and are never rewritten or deleted, since the
//! user may have edited them.
//!
//! A run is all-or-nothing up to the first file write: a failed fetch or a
//! failed folder creation aborts before anything is written. After that,
//! a file that cannot be created is logged, counted in
//! [`SyncReport::failed`], and the run moves on to the next highlight.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::api::{ApiClient, ApiError};
use crate::config::SettingsStore;
use crate::models::{RemoteHighlight, RemoteId};
use crate::notice::{NoticeMode, NoticeSink, SyncNotice};

/// Number of highlight characters that go into a file name.
pub const SLUG_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum FolderError {
    /// Benign: the folder is already there.
    #[error("folder already exists: {0}")]
    AlreadyExists(String),
    #[error("failed to create folder {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Local identity of a highlight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub highlight_id: String,
    pub file_name: String,
}

impl SyncKey {
    pub fn for_highlight(highlight: &RemoteHighlight) -> Self {
        let highlight_id = match &highlight.id {
            RemoteId::Int(n) => encode_id(&n.to_string()),
            RemoteId::Text(s) => encode_id(s),
        };
        let slug = sanitize(&highlight.text.chars().take(SLUG_CHARS).collect::<String>());
        let file_name = format!("{}_{}.md", highlight_id, slug);
        Self {
            highlight_id,
            file_name,
        }
    }

    /// Encoded id of a vault file name, or `None` for other files.
    pub fn id_of(file_name: &str) -> Option<&str> {
        let stem = file_name.strip_suffix(".md")?;
        stem.split_once('_').map(|(id, _)| id)
    }

    pub fn matches(&self, file_name: &str) -> bool {
        Self::id_of(file_name) == Some(self.highlight_id.as_str())
    }
}

fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() {
            out.push(b as char);
        } else {
            out.push_str(&format!("-{:02x}", b));
        }
    }
    out
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Vault capabilities the sync needs.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create_folder(&self, folder: &str) -> Result<(), FolderError>;

    /// Whether a file for this key is already present in `folder`.
    async fn exists(&self, folder: &str, key: &SyncKey) -> Result<bool>;

    /// Create the file. Must fail rather than overwrite.
    async fn create(&self, folder: &str, key: &SyncKey, content: &str) -> Result<()>;
}

/// Vault on the local filesystem, rooted at the vault directory.
pub struct FsFileStore {
    root: PathBuf,
}

impl FsFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn create_folder(&self, folder: &str) -> Result<(), FolderError> {
        let path = self.root.join(folder);
        if path.is_dir() {
            return Err(FolderError::AlreadyExists(folder.to_string()));
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| FolderError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    async fn exists(&self, folder: &str, key: &SyncKey) -> Result<bool> {
        let dir = self.root.join(folder);
        let key = key.clone();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            if dir.join(&key.file_name).is_file() {
                return Ok(true);
            }
            if !dir.is_dir() {
                return Ok(false);
            }
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                if entry.file_type().is_file() && key.matches(&entry.file_name().to_string_lossy()) {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await?
    }

    async fn create(&self, folder: &str, key: &SyncKey, content: &str) -> Result<()> {
        let path = self.root.join(folder).join(&key.file_name);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;

        let written = async {
            file.write_all(content.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // A partial file would be taken for a finished one next run.
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(anyhow!("Failed to write {}: {}", path.display(), e));
        }
        Ok(())
    }
}

/// In-memory vault. Paths are `folder/file_name`.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<String, String>>,
    folders: Mutex<Vec<String>>,
    fail_ids: Vec<String>,
    folder_fails: bool,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating files for these highlight ids fails.
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            fail_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Creating any folder fails with an I/O error.
    pub fn failing_folders() -> Self {
        Self {
            folder_fails: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, path: &str, content: &str) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), content.to_string());
        }
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn folders(&self) -> Vec<String> {
        self.folders.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn create_folder(&self, folder: &str) -> Result<(), FolderError> {
        if self.folder_fails {
            return Err(FolderError::Io {
                path: folder.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only vault"),
            });
        }
        let mut folders = self
            .folders
            .lock()
            .map_err(|_| FolderError::Io {
                path: folder.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "lock poisoned"),
            })?;
        if folders.iter().any(|f| f == folder) {
            return Err(FolderError::AlreadyExists(folder.to_string()));
        }
        folders.push(folder.to_string());
        Ok(())
    }

    async fn exists(&self, folder: &str, key: &SyncKey) -> Result<bool> {
        let prefix = format!("{}/", folder);
        let files = self.files.lock().map_err(|_| anyhow!("lock poisoned"))?;
        Ok(files.keys().any(|path| {
            path.strip_prefix(&prefix)
                .map(|name| !name.contains('/') && key.matches(name))
                .unwrap_or(false)
        }))
    }

    async fn create(&self, folder: &str, key: &SyncKey, content: &str) -> Result<()> {
        if self.fail_ids.contains(&key.highlight_id) {
            return Err(anyhow!("disk full"));
        }
        let path = format!("{}/{}", folder, key.file_name);
        let mut files = self.files.lock().map_err(|_| anyhow!("lock poisoned"))?;
        if files.contains_key(&path) {
            return Err(anyhow!("{} already exists", path));
        }
        files.insert(path, content.to_string());
        Ok(())
    }
}

/// What one sync run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Highlights considered, whether or not a file was created.
    pub synced_count: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(highlight id, error)` for each file that could not be created.
    pub errors: Vec<(String, String)>,
}

impl SyncReport {
    pub fn notice(&self) -> SyncNotice {
        SyncNotice::Synced {
            count: self.synced_count,
            created: self.created,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

pub struct VaultSync {
    settings: Arc<dyn SettingsStore>,
    files: Arc<dyn FileStore>,
}

impl VaultSync {
    pub fn new(settings: Arc<dyn SettingsStore>, files: Arc<dyn FileStore>) -> Self {
        Self { settings, files }
    }

    /// Fetch every highlight and materialize the missing ones.
    pub async fn sync(&self) -> Result<SyncReport> {
        let settings = self.settings.load()?;
        let credentials = settings
            .api_credentials()
            .ok_or_else(|| anyhow!("API settings not configured"))?;
        let api = ApiClient::new(&credentials, settings.http.timeout_secs)?;

        let highlights = api.list_highlights().await.map_err(|e| match e {
            ApiError::Status { status, .. } => {
                anyhow!("HTTP error! status: {}", status.as_u16())
            }
            other => anyhow!(other),
        })?;

        let folder = settings.vault.subfolder.clone();
        match self.files.create_folder(&folder).await {
            Ok(()) => tracing::debug!("created vault folder {}", folder),
            Err(FolderError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let mut report = SyncReport {
            synced_count: highlights.len(),
            ..SyncReport::default()
        };

        for highlight in &highlights {
            let key = SyncKey::for_highlight(highlight);
            let outcome = async {
                if self.files.exists(&folder, &key).await? {
                    return Ok(false);
                }
                let content = render_markdown(highlight);
                self.files.create(&folder, &key, &content).await?;
                Ok::<bool, anyhow::Error>(true)
            }
            .await;

            match outcome {
                Ok(true) => {
                    tracing::debug!("created {}", key.file_name);
                    report.created += 1;
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("skipping highlight {}: {:#}", key.highlight_id, e);
                    report.failed += 1;
                    report.errors.push((key.highlight_id.clone(), format!("{:#}", e)));
                }
            }
        }

        Ok(report)
    }

    /// Run [`sync`](Self::sync) and report it through exactly one notice.
    pub async fn pull(&self, notices: &dyn NoticeSink) -> Result<SyncReport> {
        match self.sync().await {
            Ok(report) => {
                notices.notice(&report.notice());
                Ok(report)
            }
            Err(e) => {
                tracing::error!("error pulling highlights: {:#}", e);
                notices.notice(&SyncNotice::Failed {
                    error: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }
}

/// `zgw pull`: sync into the configured vault directory.
pub async fn run_pull(settings: Arc<dyn SettingsStore>, mode: NoticeMode) -> Result<()> {
    let root = settings.load()?.vault.path;
    let sync = VaultSync::new(settings, Arc::new(FsFileStore::new(root)));
    let sink = mode.sink();
    let report = sync.pull(sink.as_ref()).await?;
    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} highlights could not be written",
            report.failed,
            report.synced_count
        );
    }
    Ok(())
}

/// Render the vault file for one highlight. This layout is what other
/// tools read, so it must stay stable.
pub fn render_markdown(highlight: &RemoteHighlight) -> String {
    let source = &highlight.source;
    let author = non_empty(source.author.as_deref()).unwrap_or("Unknown");
    let source_created = source.created_at.as_deref().unwrap_or("");
    let tags = source
        .tags
        .as_ref()
        .map(|t| {
            t.iter()
                .map(|tag| format!("\"{}\"", yaml_escape(tag)))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let summary = non_empty(source.summary.as_deref());

    let quote = highlight
        .text
        .lines()
        .map(|l| format!("> {}", l))
        .collect::<Vec<_>>()
        .join("\n");
    let quote = if quote.is_empty() {
        "> ".to_string()
    } else {
        quote
    };

    let summary_section = summary
        .map(|s| format!("**Summary:** {}", s))
        .unwrap_or_default();
    let content_section = non_empty(source.raw.as_deref())
        .map(|raw| format!("**Content:**\n\n{}", raw))
        .unwrap_or_default();

    format!(
        "---\n\
title: \"{title}\"\n\
source_url: \"{url}\"\n\
source_type: \"{stype}\"\n\
origin: \"{origin}\"\n\
author: \"{author_q}\"\n\
created: \"{created_q}\"\n\
tags: [{tags}]\n\
summary: \"{summary_q}\"\n\
---\n\
\n\
# Highlights\n\
\n\
{quote}\n\
\n\
- note: {note}\n\
- added: {added}\n\
- location: {location}\n\
\n\
## Source Details\n\
\n\
**Title:** {title_raw}\n\
**URL:** {url_raw}\n\
**Type:** {stype_raw}\n\
**Origin:** {origin_raw}\n\
**Author:** {author}\n\
**Created:** {source_created}\n\
\n\
{summary_section}\n\
\n\
{content_section}\n",
        title = yaml_escape(&source.title),
        url = yaml_escape(&source.url),
        stype = yaml_escape(&source.source_type),
        origin = yaml_escape(&source.origin),
        author_q = yaml_escape(author),
        created_q = yaml_escape(source_created),
        tags = tags,
        summary_q = yaml_escape(summary.unwrap_or("")),
        quote = quote,
        note = highlight.note.as_deref().unwrap_or(""),
        added = highlight.created_at.as_deref().unwrap_or(""),
        location = highlight.location.as_deref().unwrap_or(""),
        title_raw = source.title,
        url_raw = source.url,
        stype_raw = source.source_type,
        origin_raw = source.origin,
        author = author,
        source_created = source_created,
        summary_section = summary_section,
        content_section = content_section,
    )
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

/// Escape for a double-quoted YAML scalar.
fn yaml_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteSource;

    fn highlight(id: i64, text: &str) -> RemoteHighlight {
        RemoteHighlight {
            id: RemoteId::Int(id),
            text: text.to_string(),
            note: None,
            location: None,
            created_at: Some("2024-05-01T10:00:00".to_string()),
            source: RemoteSource {
                title: "Rust Book".to_string(),
                url: "https://doc.rust-lang.org/book/".to_string(),
                source_type: "web".to_string(),
                origin: "doc.rust-lang.org".to_string(),
                created_at: Some("2024-04-30T09:00:00".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn file_name_uses_id_and_sanitized_prefix() {
        let key = SyncKey::for_highlight(&highlight(12, "Hello, world! It's fine."));
        assert_eq!(key.file_name, "12_Hello__world__It_s_fine_.md");
        assert_eq!(SyncKey::id_of(&key.file_name), Some("12"));
        assert_eq!(SyncKey::id_of("notes.txt"), None);
    }

    #[test]
    fn slug_takes_fifty_characters() {
        let text = "a".repeat(80);
        let key = SyncKey::for_highlight(&highlight(1, &text));
        assert_eq!(key.file_name, format!("1_{}.md", "a".repeat(50)));

        let accented = "é".repeat(60);
        let key = SyncKey::for_highlight(&highlight(2, &accented));
        assert_eq!(key.file_name, format!("2_{}.md", "_".repeat(50)));
    }

    #[test]
    fn key_matches_same_id_regardless_of_text() {
        let old = SyncKey::for_highlight(&highlight(7, "original text"));
        let new = SyncKey::for_highlight(&highlight(7, "edited on the server"));
        assert_ne!(old.file_name, new.file_name);
        assert!(new.matches(&old.file_name));
        assert!(!SyncKey::for_highlight(&highlight(77, "x")).matches(&old.file_name));
    }

    #[test]
    fn string_ids_cannot_escape_the_folder() {
        let mut h = highlight(0, "t");
        h.id = RemoteId::Text("../evil".to_string());
        let key = SyncKey::for_highlight(&h);
        assert_eq!(key.file_name, "-2e-2e-2fevil_t.md");
    }

    fn text_key(id: &str, text: &str) -> SyncKey {
        let mut h = highlight(0, text);
        h.id = RemoteId::Text(id.to_string());
        SyncKey::for_highlight(&h)
    }

    #[test]
    fn distinct_string_ids_never_share_a_key() {
        let dash = text_key("x-y", "third");
        let dot = text_key("x.y", "third");
        assert_ne!(dash.file_name, dot.file_name);
        assert!(!dash.matches(&dot.file_name));

        let short = text_key("a", "first");
        let long = text_key("a_b", "first");
        assert_eq!(long.file_name, "a-5fb_first.md");
        assert!(!short.matches(&long.file_name));
        assert!(!long.matches(&short.file_name));
        assert!(long.matches("a-5fb_edited.md"));
    }

    #[test]
    fn render_minimal_highlight() {
        let md = render_markdown(&highlight(1, "Ownership rules"));
        let expected = "---\n\
title: \"Rust Book\"\n\
source_url: \"https://doc.rust-lang.org/book/\"\n\
source_type: \"web\"\n\
origin: \"doc.rust-lang.org\"\n\
author: \"Unknown\"\n\
created: \"2024-04-30T09:00:00\"\n\
tags: []\n\
summary: \"\"\n\
---\n\
\n\
# Highlights\n\
\n\
> Ownership rules\n\
\n\
- note: \n\
- added: 2024-05-01T10:00:00\n\
- location: \n\
\n\
## Source Details\n\
\n\
**Title:** Rust Book\n\
**URL:** https://doc.rust-lang.org/book/\n\
**Type:** web\n\
**Origin:** doc.rust-lang.org\n\
**Author:** Unknown\n\
**Created:** 2024-04-30T09:00:00\n\
\n\
\n\
\n\
\n";
        assert_eq!(md, expected);
    }

    #[test]
    fn render_full_highlight() {
        let mut h = highlight(2, "line one\nline two");
        h.note = Some("check this".to_string());
        h.location = Some("ch. 4".to_string());
        h.source.author = Some("Klabnik \"Steve\"".to_string());
        h.source.tags = Some(vec!["rust".to_string(), "memory".to_string()]);
        h.source.summary = Some("About ownership".to_string());
        h.source.raw = Some("Full chapter text".to_string());

        let md = render_markdown(&h);
        assert!(md.contains("author: \"Klabnik \\\"Steve\\\"\"\n"));
        assert!(md.contains("**Author:** Klabnik \"Steve\"\n"));
        assert!(md.contains("tags: [\"rust\", \"memory\"]\n"));
        assert!(md.contains("summary: \"About ownership\"\n"));
        assert!(md.contains("> line one\n> line two\n"));
        assert!(md.contains("- note: check this\n"));
        assert!(md.contains("- location: ch. 4\n"));
        assert!(md.contains("\n**Summary:** About ownership\n"));
        assert!(md.ends_with("**Content:**\n\nFull chapter text\n"));
    }

    #[test]
    fn tags_with_yaml_punctuation_stay_one_item_each() {
        let mut h = highlight(4, "t");
        h.source.tags = Some(vec!["a, b".to_string(), "c]".to_string(), "say \"hi\"".to_string()]);
        let md = render_markdown(&h);
        assert!(md.contains("tags: [\"a, b\", \"c]\", \"say \\\"hi\\\"\"]\n"));
    }

    #[tokio::test]
    async fn memory_store_folder_is_idempotent() {
        let store = MemoryFileStore::new();
        store.create_folder("ZgrWise").await.unwrap();
        assert!(matches!(
            store.create_folder("ZgrWise").await,
            Err(FolderError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn fs_store_never_overwrites() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FsFileStore::new(tmp.path());
        store.create_folder("ZgrWise").await.unwrap();
        assert!(matches!(
            store.create_folder("ZgrWise").await,
            Err(FolderError::AlreadyExists(_))
        ));

        let key = SyncKey::for_highlight(&highlight(3, "first"));
        assert!(!store.exists("ZgrWise", &key).await.unwrap());
        store.create("ZgrWise", &key, "v1").await.unwrap();
        assert!(store.exists("ZgrWise", &key).await.unwrap());
        assert!(store.create("ZgrWise", &key, "v2").await.is_err());

        let on_disk = std::fs::read_to_string(tmp.path().join("ZgrWise").join(&key.file_name)).unwrap();
        assert_eq!(on_disk, "v1");

        let renamed = SyncKey::for_highlight(&highlight(3, "text changed remotely"));
        assert!(store.exists("ZgrWise", &renamed).await.unwrap());
    }

    #[tokio::test]
    async fn fs_store_rejects_folder_shadowed_by_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("ZgrWise"), "not a dir").unwrap();
        let store = FsFileStore::new(tmp.path());
        assert!(matches!(
            store.create_folder("ZgrWise").await,
            Err(FolderError::Io { .. })
        ));
    }
}
