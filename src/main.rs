//! # ZgrWise CLI (`zgw`)
//!
//! Terminal host for the ZgrWise capture and sync pipelines: save pages and
//! selections to the API, and pull highlights into a local note vault.
//!
//! ## Usage
//!
//! ```bash
//! zgw --config ./config/zgw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `zgw check` | Test the connection to the API |
//! | `zgw save` | Save a page (and optionally a selection) given on the command line |
//! | `zgw clip <page.html>` | Capture a saved HTML page and save it |
//! | `zgw capture <page.html>` | Print what would be captured, as JSON |
//! | `zgw pull` | Write every remote highlight into the vault |
//! | `zgw config get/set` | Read or change a single setting |
//!
//! ## Examples
//!
//! ```bash
//! # Point the CLI at a local server
//! zgw config set apiBase http://localhost:8000
//! zgw config set apiKey devkey
//!
//! # Save a quote from a downloaded article
//! zgw clip article.html --url https://blog.example.com/post --select "aliasing XOR mutation"
//!
//! # Sync highlights into an Obsidian vault
//! zgw config set vaultPath ~/notes
//! zgw pull
//! ```

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use zgrwise::agents::run_capture_action;
use zgrwise::capture::run_check;
use zgrwise::config::{run_config_get, run_config_set, SettingsStore, TomlSettingsStore};
use zgrwise::dom::Document;
use zgrwise::models::CaptureRecord;
use zgrwise::notice::NoticeMode;
use zgrwise::selector::PageSelector;
use zgrwise::vault::run_pull;

/// ZgrWise CLI: capture highlights and sync them into a note vault.
///
/// All commands accept a `--config` flag pointing to a TOML settings file.
/// See `config/zgw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "zgw",
    about = "ZgrWise: capture highlights and sync them into a note vault",
    version
)]
struct Cli {
    /// Path to the settings file (TOML).
    ///
    /// Defaults to `./config/zgw.toml`. A missing file reads as defaults
    /// with no API credentials.
    #[arg(long, global = true, default_value = "./config/zgw.toml")]
    config: PathBuf,

    /// More log output on stderr (`-v` info, `-vv` debug, `-vvv` trace).
    /// Overrides `RUST_LOG`.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the API is reachable with the stored key.
    Check,

    /// Save a page, and a highlight if `--selection` is given.
    Save {
        /// Page URL. Its hostname becomes the source origin.
        #[arg(long)]
        url: String,

        #[arg(long)]
        title: String,

        /// Full page text.
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,

        /// Read the full page text from a file.
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Highlighted text. Without it only the page is saved.
        #[arg(long)]
        selection: Option<String>,

        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        location: Option<String>,
    },

    /// Capture a saved HTML page and send it to the API.
    Clip {
        /// HTML snapshot of the page.
        page: PathBuf,

        #[arg(long)]
        url: String,

        /// Select the first occurrence of this text on the page.
        #[arg(long)]
        select: Option<String>,

        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        location: Option<String>,
    },

    /// Print the capture record for a saved HTML page without saving it.
    Capture {
        page: PathBuf,

        #[arg(long)]
        url: String,

        #[arg(long)]
        select: Option<String>,
    },

    /// Pull every highlight into the vault folder.
    ///
    /// Existing files are never touched; only missing highlights are
    /// written.
    Pull {
        /// Notice format. Defaults to human on a TTY, JSON otherwise.
        #[arg(long, value_enum)]
        notice: Option<NoticeMode>,
    },

    /// Read or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting (`apiBase`, `apiKey`, `vaultPath`, `vaultSubfolder`,
    /// `httpTimeoutSecs`).
    Get { key: String },
    /// Change one setting. Values are trimmed; an empty value clears it.
    Set { key: String, value: String },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_page(path: &Path, url: &str, select: Option<&str>) -> anyhow::Result<PageSelector> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read page: {}", path.display()))?;
    let mut selector = PageSelector::new(Document::parse(&html), url);
    if let Some(needle) = select {
        if !selector.select_text(needle) {
            bail!("Text not found on page: '{}'", needle);
        }
    }
    Ok(selector)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings: Arc<dyn SettingsStore> = Arc::new(TomlSettingsStore::new(&cli.config));

    match cli.command {
        Commands::Check => {
            run_check(settings).await?;
        }
        Commands::Save {
            url,
            title,
            content,
            content_file,
            selection,
            note,
            location,
        } => {
            let page_content = match (content, content_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read content: {}", path.display()))?,
                (None, None) => String::new(),
            };
            let record = CaptureRecord {
                selection_text: selection.unwrap_or_default().trim().to_string(),
                page_title: title,
                page_url: url,
                page_content,
                surrounding_context: None,
                note,
                location,
            };
            run_capture_action(settings, Arc::new(record)).await?;
        }
        Commands::Clip {
            page,
            url,
            select,
            note,
            location,
        } => {
            let selector = load_page(&page, &url, select.as_deref())?
                .with_note(note)
                .with_location(location);
            run_capture_action(settings, Arc::new(selector)).await?;
        }
        Commands::Capture { page, url, select } => {
            let record = load_page(&page, &url, select.as_deref())?.capture();
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Pull { notice } => {
            let mode = notice.unwrap_or_else(NoticeMode::default_for_tty);
            run_pull(settings, mode).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => run_config_get(settings.as_ref(), &key)?,
            ConfigAction::Set { key, value } => run_config_set(settings.as_ref(), &key, &value)?,
        },
    }

    Ok(())
}
