//! Writes each conversation as `<dest>/<name>/index.md` and copies its
//! attachments into `<dest>/<name>/media/` under stable names.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::model::{Contact, Dataset, Direction, Message, local_time};
use crate::transcript::{self, HARD_BREAK, TIMESTAMP_FORMAT};
use crate::utils::{ExportConfig, Verbosity};

pub const TRANSCRIPT_FILE: &str = "index.md";
pub const MEDIA_DIR: &str = "media";
pub const MEMBERS_FILE: &str = "members.txt";

pub const ME: &str = "Me";
pub const NO_SENDER: &str = "No-Sender";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "tif", "tiff"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub conversations: usize,
    pub messages: usize,
    pub attachments_copied: usize,
    pub attachments_failed: usize,
}

/// Write every conversation in `dataset` below `config.dest`.
pub fn export_all(dataset: &Dataset, config: &ExportConfig) -> Result<ExportStats> {
    let pb = progress_bar(dataset.conversations.len() as u64, config.verbosity);
    let attachments_root = config.attachments_root();
    let mut stats = ExportStats::default();
    let mut written: HashSet<String> = HashSet::new();

    for (cid, messages) in &dataset.conversations {
        let Some(contact) = dataset.contacts.get(cid) else {
            continue;
        };
        let name = contact.dir_name();
        let append = !written.insert(name.clone());
        if append {
            warn!("Conversation {} shares directory {:?} with another", cid, name);
        }

        let conv_stats = export_conversation(
            contact,
            messages,
            &dataset.contacts,
            &config.dest.join(&name),
            &attachments_root,
            append,
        )
        .wrap_err_with(|| format!("Failed to export conversation {}", name))?;

        stats.conversations += 1;
        stats.messages += conv_stats.messages;
        stats.attachments_copied += conv_stats.attachments_copied;
        stats.attachments_failed += conv_stats.attachments_failed;
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

fn progress_bar(len: u64, verbosity: Verbosity) -> ProgressBar {
    if verbosity != Verbosity::Normal {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} conversations",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Render one conversation into `dir`, appending when `append` is set.
pub fn export_conversation(
    contact: &Contact,
    messages: &[Message],
    contacts: &BTreeMap<String, Contact>,
    dir: &Path,
    attachments_root: &Path,
    append: bool,
) -> Result<ExportStats> {
    debug!("Doing markdown for: {}", dir.display());
    let media = dir.join(MEDIA_DIR);
    fs::create_dir_all(&media)
        .wrap_err_with(|| format!("Failed to create: {}", media.display()))?;

    let path = dir.join(TRANSCRIPT_FILE);
    let file = if append {
        OpenOptions::new().create(true).append(true).open(&path)
    } else {
        File::create(&path)
    }
    .wrap_err_with(|| format!("Failed to create: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut stats = ExportStats::default();
    for msg in messages {
        let sender = resolve_sender(msg, contact, contacts);
        let copied = copy_attachments(msg, attachments_root, &media, &mut stats);
        writer.write_all(render_message(msg, &sender, &copied).as_bytes())?;
        stats.messages += 1;
    }
    writer.flush().wrap_err("Failed to flush transcript")?;

    if contact.is_group && !contact.members.is_empty() {
        fs::write(dir.join(MEMBERS_FILE), contact.members.join("\n") + "\n")
            .wrap_err("Failed to write group members")?;
    }

    Ok(stats)
}

/// `"Me"` for outgoing messages; otherwise the group member whose number sent
/// the message, or the conversation's own contact.
pub fn resolve_sender(
    msg: &Message,
    contact: &Contact,
    contacts: &BTreeMap<String, Contact>,
) -> String {
    if msg.direction == Direction::Outgoing {
        return ME.to_string();
    }

    let resolved = if contact.is_group {
        msg.source.as_deref().and_then(|source| {
            contacts
                .values()
                .find(|c| c.number.as_deref() == Some(source))
                .map(Contact::dir_name)
        })
    } else {
        Some(contact.dir_name())
    };

    resolved.unwrap_or_else(|| {
        debug!("No sender for message {}", msg.id.as_deref().unwrap_or("?"));
        NO_SENDER.to_string()
    })
}

/// Strip backticks so no code spans form, then add the hard-break marker.
pub fn sanitize_body(body: &str) -> String {
    let mut s = body.replace('`', "");
    s.push_str(HARD_BREAK);
    s
}

/// `{date}_{index:02}_{file_name}` with spaces and slashes made path-safe.
pub fn rendered_name(date: &str, index: usize, file_name: &str) -> String {
    format!("{}_{:02}_{}", date, index, file_name)
        .replace(' ', "_")
        .replace('/', "-")
}

/// Markdown link (or image) for a copied attachment.
pub fn attachment_link(rendered: &str) -> String {
    let path = format!("{}/{}", MEDIA_DIR, rendered).replace(' ', "%20");
    let is_image = Path::new(rendered)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    let bang = if is_image { "!" } else { "" };
    format!("{}[{}](./{}){}", bang, rendered, path, HARD_BREAK)
}

/// Transcript text for one message.
pub fn render_message(msg: &Message, sender: &str, attachments: &[String]) -> String {
    let mut body = sanitize_body(&msg.body);
    for rendered in attachments {
        body.push_str(&attachment_link(rendered));
    }
    transcript::format_record(&format_timestamp(msg.timestamp_or_epoch()), sender, &body)
}

pub fn format_timestamp(millis: i64) -> String {
    local_time(millis)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| "1970-01-01 00:00".to_string())
}

fn format_date(millis: i64) -> String {
    local_time(millis)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Copy a message's attachments into `media`, returning the names of those
/// that made it. Failures are logged and skipped.
fn copy_attachments(
    msg: &Message,
    attachments_root: &Path,
    media: &Path,
    stats: &mut ExportStats,
) -> Vec<String> {
    if msg.attachments.is_empty() {
        return Vec::new();
    }
    let date = format_date(msg.timestamp_or_epoch());
    let mut copied = Vec::with_capacity(msg.attachments.len());

    for (i, att) in msg.attachments.iter().enumerate() {
        let name = rendered_name(&date, i, &att.file_name);
        let Some(source_path) = att.source_path.as_deref() else {
            warn!("Broken attachment (no path): {}", name);
            stats.attachments_failed += 1;
            continue;
        };
        // Some stores record Windows separators.
        let src: PathBuf = attachments_root.join(source_path.replace('\\', "/"));
        match fs::copy(&src, media.join(&name)) {
            Ok(_) => {
                stats.attachments_copied += 1;
                copied.push(name);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Attachment not found: {} ({})", name, src.display());
                stats.attachments_failed += 1;
            }
            Err(e) => {
                warn!("Failed to copy attachment {}: {}", name, e);
                stats.attachments_failed += 1;
            }
        }
    }
    copied
}
