//! Folding a previous export into a fresh one.
//!
//! Transcripts are parsed into records, old records first, and any record
//! whose exact text was already seen is dropped. Because the exporter's
//! output is deterministic for an unchanged message, a message exported twice
//! collapses to one record and its media file keeps the same name.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::ExportError;
use crate::exporter::{MEDIA_DIR, TRANSCRIPT_FILE};
use crate::transcript::{self, Record};

/// Read/write access to conversation transcripts by conversation name.
pub trait TranscriptStore {
    /// `Ok(None)` when the conversation has no transcript.
    fn read(&self, conversation: &str) -> io::Result<Option<String>>;
    fn write(&self, conversation: &str, text: &str) -> io::Result<()>;
}

/// Transcripts laid out as `<root>/<conversation>/index.md`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, conversation: &str) -> PathBuf {
        self.root.join(conversation).join(TRANSCRIPT_FILE)
    }
}

impl TranscriptStore for DirStore {
    fn read(&self, conversation: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(conversation)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, conversation: &str, text: &str) -> io::Result<()> {
        fs::write(self.path(conversation), text)
    }
}

/// Union of two record lists: old records first, each distinct record once.
pub fn merge_records(old: &[Record], new: &[Record]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    old.iter()
        .chain(new)
        .map(Record::flatten)
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

/// Merge two transcripts. Fails if either does not start with a header.
pub fn merge_transcripts(old: &str, new: &str) -> Result<String, ExportError> {
    let old = transcript::parse(old)?;
    let new = transcript::parse(new)?;
    Ok(merge_records(&old, &new).concat())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Both sides had records; the result was written.
    Merged,
    /// Nothing new this run; the old transcript was kept as-is.
    CarriedOver,
    /// No usable prior transcript.
    NoPrior,
}

/// Merge one conversation's transcript from `old` into `new`.
pub fn merge_conversation<N, O>(
    new: &N,
    old: &O,
    conversation: &str,
) -> Result<MergeOutcome, ExportError>
where
    N: TranscriptStore + ?Sized,
    O: TranscriptStore + ?Sized,
{
    let Some(old_text) = old.read(conversation)? else {
        debug!("No old transcript for {}", conversation);
        return Ok(MergeOutcome::NoPrior);
    };
    if old_text.is_empty() {
        return Ok(MergeOutcome::NoPrior);
    }

    let new_text = new.read(conversation)?.unwrap_or_default();
    if new_text.is_empty() {
        debug!("No new messages for {}", conversation);
        // Still validate so a corrupt old file is reported, not copied.
        transcript::parse(&old_text)?;
        new.write(conversation, &old_text)?;
        return Ok(MergeOutcome::CarriedOver);
    }

    let merged = merge_transcripts(&old_text, &new_text)?;
    new.write(conversation, &merged)?;
    Ok(MergeOutcome::Merged)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged: usize,
    pub carried_over: usize,
    /// Conversations only present in the old export, copied wholesale.
    pub copied: usize,
    pub failed: usize,
    pub media_copied: usize,
    pub media_conflicts: usize,
}

/// Merge every conversation of the export at `old` into `dest`.
///
/// A conversation whose transcript cannot be parsed is reported and left as
/// the new run wrote it; the rest of the merge continues.
pub fn merge_with_old(dest: &Path, old: &Path) -> Result<MergeStats> {
    let new_store = DirStore::new(dest);
    let old_store = DirStore::new(old);
    let mut stats = MergeStats::default();

    let entries =
        fs::read_dir(old).wrap_err_with(|| format!("Failed to read old export: {}", old.display()))?;
    for entry in entries.flatten() {
        let old_dir = entry.path();
        if !old_dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let new_dir = dest.join(&name);

        if !new_dir.is_dir() {
            info!("Copying conversation only present in old export: {}", name);
            copy_dir_all(&old_dir, &new_dir)
                .wrap_err_with(|| format!("Failed to copy {}", old_dir.display()))?;
            stats.copied += 1;
            continue;
        }

        debug!("Merging {}", name);
        let (copied, conflicts) =
            merge_media(&old_dir.join(MEDIA_DIR), &new_dir.join(MEDIA_DIR))
                .wrap_err_with(|| format!("Failed to merge media for {}", name))?;
        stats.media_copied += copied;
        stats.media_conflicts += conflicts;

        match merge_conversation(&new_store, &old_store, &name) {
            Ok(MergeOutcome::Merged) => stats.merged += 1,
            Ok(MergeOutcome::CarriedOver) => stats.carried_over += 1,
            Ok(MergeOutcome::NoPrior) => {}
            Err(e) => {
                error!("Could not merge {}: {}", name, e);
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// Copy files from `old_media` into `new_media`, keeping the new copy when
/// both exist. Returns (files copied, same-name files whose contents differ).
fn merge_media(old_media: &Path, new_media: &Path) -> io::Result<(usize, usize)> {
    if !old_media.is_dir() {
        return Ok((0, 0));
    }
    fs::create_dir_all(new_media)?;

    let mut copied = 0;
    let mut conflicts = 0;
    for entry in fs::read_dir(old_media)?.flatten() {
        let src = entry.path();
        if !src.is_file() {
            continue;
        }
        let dst = new_media.join(entry.file_name());
        if dst.exists() {
            if file_digest(&src)? != file_digest(&dst)? {
                warn!(
                    "Media file differs between exports, keeping new: {}",
                    dst.display()
                );
                conflicts += 1;
            }
            continue;
        }
        fs::copy(&src, &dst)?;
        copied += 1;
    }
    Ok((copied, conflicts))
}

fn file_digest(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)?.flatten() {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_all(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
