//! Normalized in-memory view of the store: contacts, conversations, messages
//! and attachments, plus the builder that produces it from raw rows.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::importer::{ConversationRow, MessageRow, Payload, RawAttachment, RawMessage};

/// A contact or group, keyed by the store's conversation id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    /// Name as stored (`name`, falling back to `profileName`).
    pub title: Option<String>,
    /// `title` reduced to alphanumerics and whitespace; `None` if nothing survives.
    pub display_name: Option<String>,
    pub number: Option<String>,
    pub profile_name: Option<String>,
    pub is_group: bool,
    /// Resolved member names, groups only.
    pub members: Vec<String>,
}

impl Contact {
    /// Name used for this conversation's output directory.
    pub fn dir_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.number.clone())
            .unwrap_or_else(|| "None".to_string())
    }

    /// Whether `selector` names this contact, by id, name or profile name.
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector
            || self.title.as_deref() == Some(selector)
            || self.display_name.as_deref() == Some(selector)
            || self.profile_name.as_deref() == Some(selector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content_type: Option<String>,
    pub file_name: String,
    /// Location under `attachments.noindex/`, if the store recorded one.
    pub source_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<String>,
    /// Milliseconds since the epoch: `timestamp`, else `sent_at`.
    pub timestamp: Option<i64>,
    pub body: String,
    pub direction: Direction,
    /// Sender phone number, used to resolve names in groups.
    pub source: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn timestamp_or_epoch(&self) -> i64 {
        self.timestamp.unwrap_or(0)
    }

    /// Send time in the local timezone, if the message carries one.
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        self.timestamp.and_then(local_time)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Contacts plus one ordered message list per contact id.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub contacts: BTreeMap<String, Contact>,
    pub conversations: BTreeMap<String, Vec<Message>>,
    /// Message rows skipped because their payload was malformed.
    pub malformed: usize,
}

impl Dataset {
    pub fn message_count(&self) -> usize {
        self.conversations.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Restrict to contacts whose name or profile name is listed.
    pub chats: Option<Vec<String>>,
    /// `attachments.noindex/`, used to sniff types for nameless attachments.
    pub attachments_root: Option<PathBuf>,
}

pub fn local_time(millis: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&Local))
}

/// Keep only characters that are safe in a directory name. Any whitespace
/// becomes a plain space so the name stays on one transcript line.
pub fn sanitize_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if cleaned.trim().is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn build(
    conversation_rows: &[ConversationRow],
    message_rows: &[MessageRow],
    options: &BuildOptions,
) -> Dataset {
    let by_id: HashMap<&str, &ConversationRow> =
        conversation_rows.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut dataset = Dataset::default();

    for row in conversation_rows {
        if let Some(chats) = &options.chats {
            let wanted = |n: &Option<String>| n.as_ref().is_some_and(|n| chats.contains(n));
            if !wanted(&row.name) && !wanted(&row.profile_name) {
                continue;
            }
        }

        let title = row.name.clone().or_else(|| row.profile_name.clone());
        debug!("Loading conversation: {}", title.as_deref().unwrap_or(&row.id));

        let members = if row.is_group() {
            resolve_members(row, &by_id)
        } else {
            Vec::new()
        };

        dataset.contacts.insert(
            row.id.clone(),
            Contact {
                id: row.id.clone(),
                display_name: title.as_deref().and_then(sanitize_name),
                title,
                number: row.e164.clone(),
                profile_name: row.profile_name.clone(),
                is_group: row.is_group(),
                members,
            },
        );
        dataset.conversations.insert(row.id.clone(), Vec::new());
    }

    for row in message_rows {
        let raw = match Payload::parse(&row.json).into_result() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping message: {}", e);
                dataset.malformed += 1;
                continue;
            }
        };
        let Some(cid) = row.conversation_id.as_deref() else {
            continue;
        };
        if let Some(messages) = dataset.conversations.get_mut(cid) {
            messages.push(to_message(raw, options.attachments_root.as_deref()));
        }
    }

    dataset
}

fn resolve_members(row: &ConversationRow, by_id: &HashMap<&str, &ConversationRow>) -> Vec<String> {
    let Some(members) = row.members.as_deref() else {
        debug!("Empty group: {}", row.id);
        return Vec::new();
    };
    members
        .split_whitespace()
        .map(|member| {
            by_id
                .get(member)
                .and_then(|m| m.name.clone().or_else(|| m.profile_name.clone()))
                .unwrap_or_else(|| {
                    debug!("No name for group member {}", member);
                    member.to_string()
                })
        })
        .collect()
}

fn to_message(raw: RawMessage, attachments_root: Option<&Path>) -> Message {
    let direction = if raw.kind.as_deref() == Some("outgoing") {
        Direction::Outgoing
    } else {
        Direction::Incoming
    };
    let attachments = raw
        .attachments
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, att)| {
            to_attachment(att, raw.id.as_deref(), raw.timestamp, index, attachments_root)
        })
        .collect();

    Message {
        id: raw.id,
        timestamp: raw.timestamp.or(raw.sent_at),
        body: raw.body.unwrap_or_default(),
        direction,
        source: raw.source,
        attachments,
    }
}

fn to_attachment(
    raw: RawAttachment,
    msg_id: Option<&str>,
    timestamp: Option<i64>,
    index: usize,
    root: Option<&Path>,
) -> Attachment {
    let RawAttachment {
        content_type,
        file_name,
        path,
    } = raw;
    let file_name = match file_name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => {
            // Same message, same slot, same stored file: same name on every run.
            let seed = format!(
                "{}/{}/{}/{}",
                msg_id.unwrap_or_default(),
                timestamp.unwrap_or_default(),
                index,
                path.as_deref().unwrap_or_default()
            );
            let name =
                generate_file_name(&seed, content_type.as_deref(), path.as_deref(), root);
            debug!(
                "Generated fileName {} for attachment in message {}",
                name,
                msg_id.unwrap_or("?")
            );
            name
        }
    };
    Attachment {
        content_type,
        file_name,
        source_path: path,
    }
}

/// Name-based UUID stem derived from `seed`, plus an extension taken from
/// the MIME subtype or sniffed from the stored file.
fn generate_file_name(
    seed: &str,
    content_type: Option<&str>,
    path: Option<&str>,
    root: Option<&Path>,
) -> String {
    let stem = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    let ext = content_type
        .and_then(extension_from_mime)
        .or_else(|| sniff_extension(path?, root?));
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

pub fn extension_from_mime(content_type: &str) -> Option<String> {
    let subtype = content_type.split('/').nth(1)?;
    let subtype = subtype.split(';').next().unwrap_or(subtype).trim();
    if subtype.is_empty() {
        None
    } else {
        Some(subtype.to_string())
    }
}

fn sniff_extension(path: &str, root: &Path) -> Option<String> {
    let full = root.join(path.replace('\\', "/"));
    infer::get_from_path(full)
        .ok()
        .flatten()
        .map(|kind| kind.extension().to_string())
}
