//! Selection predicates applied between extraction and rendering.

use chrono::Datelike;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::model::{Dataset, Message};

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Keep only messages sent in this calendar year (local time).
    pub year: Option<i32>,
    pub attachments_only: bool,
    /// Export exactly one conversation, matched by id or name.
    pub conversation: Option<String>,
}

/// Reduce `dataset` to what the options select.
///
/// A conversation selector wins outright: the matching conversation is
/// returned as-is and no other predicate runs. Otherwise every message must
/// pass all active predicates, and conversations left empty are dropped.
pub fn apply(
    mut dataset: Dataset,
    options: &FilterOptions,
    classifier: Option<&dyn Classifier>,
) -> Dataset {
    if let Some(selector) = options.conversation.as_deref() {
        return select_conversation(dataset, selector);
    }

    let conversations = std::mem::take(&mut dataset.conversations);
    for (cid, messages) in conversations {
        let kept: Vec<Message> = messages
            .into_iter()
            .filter(|m| keep(m, options, classifier))
            .collect();
        if kept.is_empty() {
            debug!("Dropping conversation {} (no messages left)", cid);
        } else {
            dataset.conversations.insert(cid, kept);
        }
    }
    dataset
}

/// Keep only the conversation whose contact matches `selector`.
pub fn select_conversation(mut dataset: Dataset, selector: &str) -> Dataset {
    let contacts = &dataset.contacts;
    dataset
        .conversations
        .retain(|cid, _| contacts.get(cid).is_some_and(|c| c.matches(selector)));
    if dataset.conversations.is_empty() {
        warn!("No conversation matches {:?}", selector);
    } else {
        info!("Exporting only conversation {:?}", selector);
    }
    dataset
}

fn keep(msg: &Message, options: &FilterOptions, classifier: Option<&dyn Classifier>) -> bool {
    if let Some(year) = options.year {
        match msg.local_time() {
            Some(dt) if dt.year() == year => {}
            _ => return false,
        }
    }

    if options.attachments_only && !msg.has_attachments() {
        return false;
    }

    if let Some(classifier) = classifier {
        if msg.body.is_empty() {
            return false;
        }
        return match classifier.classify(&msg.body) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Classifier failed, dropping message: {}", e);
                false
            }
        };
    }

    true
}
