//! # signal-chat-export
//!
//! Exports the conversations held by [Signal Desktop](https://signal.org/download/)
//! into a browsable, per-conversation archive.
//!
//! ## What it does
//!
//! Signal Desktop keeps its messages in an SQLCipher-encrypted SQLite store and its
//! attachments as loose files next to it. This crate reads the store through a private
//! snapshot, builds a typed model of conversations and messages, and writes one
//! directory per conversation:
//!
//! - `index.md`, a plain-text transcript with one `[YYYY-MM-DD HH:MM] sender: body` record
//!   per message,
//! - `media/`, the copied attachments under deterministic names,
//! - `index.html`, a paginated view of the transcript.
//!
//! The store itself is never modified.
//!
//! ## Incremental export
//!
//! Given a previous export, each transcript is merged with its older counterpart: records
//! are unioned, older first, with exact duplicates dropped. Running the same merge twice
//! gives the same result.
//!
//! ## Usage
//!
//! ```sh
//! # Export everything into ./output
//! signal-chat-export
//!
//! # Only 2023, merged into last year's archive
//! signal-chat-export signal-2023 --year 2023 --old signal-2022
//! ```
//!
//! Preferences can be persisted in `~/.config/signal-chat-export/config.toml`.

pub mod classifier;
pub mod error;
pub mod exporter;
pub mod filter;
pub mod html;
pub mod importer;
pub mod logging;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod transcript;
pub mod utils;
