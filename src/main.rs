use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use signal_chat_export::utils::{DEFAULT_PAGE_SIZE, ExportConfig, Verbosity};
use signal_chat_export::{logging, pipeline};

/// Export Signal Desktop conversations to Markdown transcripts and paginated HTML.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to export into.
    /// Defaults to ./output if not set in config.
    #[arg(value_name = "DEST")]
    dest: Option<PathBuf>,

    /// Signal Desktop profile directory (holding config.json and sql/).
    /// Auto-detected if omitted.
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/signal-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Comma-separated chat names to export (e.g. "Alice,Book Club").
    #[arg(short, long, value_name = "NAMES", value_delimiter = ',')]
    chats: Option<Vec<String>>,

    /// Print the available chat names and exit.
    #[arg(long)]
    list_chats: bool,

    /// Previous export to merge into this one.
    #[arg(long, value_name = "DIR")]
    old: Option<PathBuf>,

    /// Replace the destination if it already exists.
    #[arg(short, long)]
    overwrite: bool,

    /// Export a single conversation, by id or name. Other filters are ignored.
    #[arg(short = 'i', long, value_name = "ID")]
    conversation_id: Option<String>,

    /// Keep only messages sent in this year (local time).
    #[arg(short, long)]
    year: Option<i32>,

    /// Keep only messages that carry attachments.
    #[arg(long)]
    attachments_only: bool,

    /// Messages per HTML page.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    page_size: Option<u64>,

    /// Command that decides which messages to keep. It reads a message body on
    /// stdin and keeps the message when its first output word is TRUE.
    #[arg(long, value_name = "CMD")]
    classifier_cmd: Option<String>,

    /// Print each conversation and file as it is handled.
    #[arg(short, long)]
    verbose: bool,

    /// Only report warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    dest: Option<PathBuf>,
    source: Option<PathBuf>,
    chats: Option<Vec<String>>,
    page_size: Option<usize>,
    classifier_cmd: Option<String>,
}

fn default_source_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Signal"))
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("signal-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);
    logging::init(verbosity);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve dest (CLI > Config > Default)
    let dest = cli
        .dest
        .or(file_cfg.dest)
        .unwrap_or_else(|| PathBuf::from("output"));

    // 3. Resolve source (CLI > Config > Auto-detect)
    let source = cli
        .source
        .or(file_cfg.source)
        .or_else(default_source_dir)
        .ok_or_else(|| {
            eyre!("Could not determine the Signal directory.\nUse --source to specify it manually, or set source in config.toml.")
        })?;

    // 4. Resolve the rest (CLI > Config > Default)
    let page_size = match cli.page_size {
        Some(n) => usize::try_from(n).wrap_err("Page size too large")?,
        None => file_cfg.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    if page_size == 0 {
        return Err(eyre!("page_size in config.toml must be at least 1"));
    }

    let config = ExportConfig {
        old: cli.old,
        chats: cli.chats.or(file_cfg.chats),
        conversation: cli.conversation_id,
        year: cli.year,
        attachments_only: cli.attachments_only,
        classifier_cmd: cli.classifier_cmd.or(file_cfg.classifier_cmd),
        page_size,
        overwrite: cli.overwrite,
        list_chats: cli.list_chats,
        verbosity,
        ..ExportConfig::new(dest, source)
    };

    // 5. Run the Business Logic
    let summary = pipeline::execute(&config)?;
    if let Some(chats) = summary.chats {
        for name in chats {
            println!("{name}");
        }
    }
    Ok(())
}
