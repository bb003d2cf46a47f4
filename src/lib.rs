//! # ZgrWise
//!
//! Capture-and-sync core for ZgrWise, a personal highlight library.
//!
//! Two independent pipelines share a data model and an HTTP API contract.
//! The write path turns a text selection on a page into a remote `Source`
//! plus `Highlight`; the read path pulls every highlight back down and
//! materializes each one as a Markdown file in a local note vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Selector │──▶│ Messenger │──▶│   Capture   │──▶│  ZgrWise API │
//! │  (page)  │   │ (channel) │   │   Client    │   │  /api/...    │
//! └──────────┘   └───────────┘   └─────────────┘   └──────┬───────┘
//!                                                         │
//!                          ┌──────────────┐               │
//!                          │  Vault Sync  │◀──────────────┘
//!                          │    Client    │──▶ {vault}/ZgrWise/*.md
//!                          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! zgw config set apiBase http://localhost:8000
//! zgw config set apiKey devkey
//! zgw check                                  # GET /health
//! zgw clip page.html --url https://a.com/x --select "some quote"
//! zgw pull                                   # write vault files
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Settings file, keys, and the settings store |
//! | [`models`] | Capture record and API payloads |
//! | [`dom`] | Page snapshots and selection ranges |
//! | [`selector`] | Turns a page and selection into a capture record |
//! | [`messenger`] | Request/response bridge between the two agents |
//! | [`agents`] | Page agent, background agent, and popup flows |
//! | [`api`] | Typed HTTP client for the ZgrWise API |
//! | [`capture`] | Two-step source-then-highlight write protocol |
//! | [`vault`] | Highlight to Markdown file sync |
//! | [`notifier`] | Transient banners and the selection flash |
//! | [`notice`] | End-of-sync notice on stderr |

pub mod agents;
pub mod api;
pub mod capture;
pub mod config;
pub mod dom;
pub mod messenger;
pub mod models;
pub mod notice;
pub mod notifier;
pub mod selector;
pub mod vault;
