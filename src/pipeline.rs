use std::fs;
use std::path::Path;

use eyre::{Context, Result, eyre};
use tracing::info;

use crate::classifier::{Classifier, CommandClassifier};
use crate::error::ExportError;
use crate::exporter::{self, ExportStats};
use crate::filter::{self, FilterOptions};
use crate::html;
use crate::merge::{self, MergeStats};
use crate::model::BuildOptions;
use crate::source::{self, RecordSource, SqliteSource};
use crate::utils::{ExportConfig, read_key};

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub export: ExportStats,
    pub merge: Option<MergeStats>,
    pub views: usize,
    pub malformed: usize,
    /// Names printed instead of exporting, when listing chats.
    pub chats: Option<Vec<String>>,
}

/// The main entry point for the business logic: unlock the store, extract,
/// filter, render, merge and paginate.
pub fn execute(config: &ExportConfig) -> Result<RunSummary> {
    let key = read_key(&config.key_path())?;
    let db_path = config.db_path();
    if !db_path.exists() {
        return Err(eyre!("Database not found at: {}", db_path.display()));
    }
    if !config.list_chats {
        check_destination(&config.dest, config.overwrite)?;
    }

    // The snapshot is removed as soon as the source goes out of scope,
    // whichever way this function returns.
    let mut source = SqliteSource::open(&db_path, &key)?;
    execute_with_source(config, &mut source)
}

/// Run everything after unlocking against an arbitrary row source.
pub fn execute_with_source(
    config: &ExportConfig,
    source: &mut dyn RecordSource,
) -> Result<RunSummary> {
    let build = BuildOptions {
        chats: config.chats.clone(),
        attachments_root: Some(config.attachments_root()),
    };
    let dataset = source::fetch(source, &build).wrap_err("Failed to read message store")?;
    let mut summary = RunSummary {
        malformed: dataset.malformed,
        ..Default::default()
    };

    if config.list_chats {
        let mut names: Vec<String> = dataset
            .contacts
            .values()
            .filter_map(|c| c.title.clone())
            .collect();
        names.sort();
        summary.chats = Some(names);
        return Ok(summary);
    }

    let classifier = match config.classifier_cmd.as_deref() {
        Some(cmd) => Some(
            CommandClassifier::from_command_line(cmd)
                .ok_or_else(|| eyre!("Classifier command is empty"))?,
        ),
        None => None,
    };
    let options = FilterOptions {
        year: config.year,
        attachments_only: config.attachments_only,
        conversation: config.conversation.clone(),
    };
    let dataset = filter::apply(
        dataset,
        &options,
        classifier.as_ref().map(|c| c as &dyn Classifier),
    );
    info!(
        "Exporting {} conversations ({} messages)",
        dataset.conversations.len(),
        dataset.message_count()
    );

    prepare_destination(&config.dest, config.overwrite)?;

    info!("Copying attachments and creating markdown files");
    summary.export = exporter::export_all(&dataset, config)?;

    if let Some(old) = &config.old {
        info!("Merging old export at {} into {}", old.display(), config.dest.display());
        summary.merge = Some(merge::merge_with_old(&config.dest, old)?);
    }

    info!("Creating HTML files");
    summary.views = html::write_views(&config.dest, config.page_size)?;

    log_summary(&summary);
    info!("Done! Files exported to {}", config.dest.display());
    Ok(summary)
}

/// Refuse to touch an existing destination unless overwriting.
pub fn check_destination(dest: &Path, overwrite: bool) -> Result<(), ExportError> {
    if dest.is_dir() && !overwrite {
        return Err(ExportError::DestinationExists {
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

fn prepare_destination(dest: &Path, overwrite: bool) -> Result<()> {
    check_destination(dest, overwrite)?;
    if dest.is_dir() {
        fs::remove_dir_all(dest)
            .wrap_err_with(|| format!("Failed to clear {}", dest.display()))?;
    }
    fs::create_dir_all(dest).wrap_err_with(|| format!("Failed to create {}", dest.display()))?;
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    let e = &summary.export;
    info!(
        "{} conversations, {} messages, {} attachments copied, {} failed, {} malformed rows skipped",
        e.conversations, e.messages, e.attachments_copied, e.attachments_failed, summary.malformed
    );
    if let Some(m) = &summary.merge {
        info!(
            "Merged {} conversations ({} carried over, {} copied, {} failed), {} media files added",
            m.merged, m.carried_over, m.copied, m.failed, m.media_copied
        );
    }
}
