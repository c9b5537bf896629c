//! End-to-end runs of the export pipeline over in-memory stores.

use std::fs;
use std::path::Path;

use signal_chat_export::error::ExportError;
use signal_chat_export::exporter::format_timestamp;
use signal_chat_export::importer::{ConversationRow, MessageRow};
use signal_chat_export::pipeline::execute_with_source;
use signal_chat_export::source::StaticSource;
use signal_chat_export::utils::{ExportConfig, Verbosity};
use tempfile::TempDir;

// 2024-01-15 12:00 UTC and one day later.
const T1: i64 = 1_705_320_000_000;
const T2: i64 = T1 + 86_400_000;

fn private(id: &str, name: &str, e164: &str) -> ConversationRow {
    ConversationRow {
        kind: "private".into(),
        id: id.into(),
        e164: Some(e164.into()),
        name: Some(name.into()),
        ..Default::default()
    }
}

fn row(cid: &str, json: &str) -> MessageRow {
    MessageRow {
        json: json.into(),
        conversation_id: Some(cid.into()),
    }
}

fn text(ts: i64, kind: &str, body: &str) -> String {
    format!(r#"{{"type": "{kind}", "body": "{body}", "timestamp": {ts}}}"#)
}

fn store() -> StaticSource {
    StaticSource {
        conversations: vec![
            private("c1", "Alice", "+100"),
            private("c2", "Bob", "+200"),
            ConversationRow {
                kind: "group".into(),
                id: "g1".into(),
                name: Some("Book Club".into()),
                members: Some("c1 c2".into()),
                ..Default::default()
            },
        ],
        messages: vec![
            row("c1", &text(T1, "incoming", "hi")),
            row("c1", &text(T1 + 60_000, "outgoing", "hello")),
            row(
                "c1",
                &format!(
                    r#"{{"type": "incoming", "body": "look", "timestamp": {T2},
                        "attachments": [{{"contentType": "image/png", "fileName": "cat pic.png", "path": "ab/cat"}}]}}"#
                ),
            ),
            row("c2", "not json"),
            row(
                "g1",
                &format!(r#"{{"type": "incoming", "body": "chapter 3", "timestamp": {T1}, "source": "+200"}}"#),
            ),
        ],
    }
}

struct Fixture {
    _tmp: TempDir,
    source: std::path::PathBuf,
    out: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("Signal");
    let attachments = source.join("attachments.noindex/ab");
    fs::create_dir_all(&attachments).unwrap();
    fs::write(attachments.join("cat"), b"\x89PNG fake").unwrap();
    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    Fixture {
        source,
        out,
        _tmp: tmp,
    }
}

fn config(dest: &Path, source: &Path) -> ExportConfig {
    ExportConfig {
        verbosity: Verbosity::Quiet,
        ..ExportConfig::new(dest, source)
    }
}

fn transcript(dest: &Path, conversation: &str) -> String {
    fs::read_to_string(dest.join(conversation).join("index.md")).unwrap()
}

#[test]
fn exports_transcripts_media_and_views() {
    let fx = fixture();
    let dest = fx.out.join("export");
    let summary = execute_with_source(&config(&dest, &fx.source), &mut store()).unwrap();

    assert_eq!(summary.malformed, 1);
    // Bob only had the malformed row, so his conversation is dropped.
    assert_eq!(summary.export.conversations, 2);
    assert!(!dest.join("Bob").exists());

    let date = &format_timestamp(T2)[..10];
    let media = format!("{date}_00_cat_pic.png");
    let expected = format!(
        "[{}] Alice: hi  \n[{}] Me: hello  \n[{}] Alice: look  ![{media}](./media/{media})  \n",
        format_timestamp(T1),
        format_timestamp(T1 + 60_000),
        format_timestamp(T2),
    );
    assert_eq!(transcript(&dest, "Alice"), expected);
    assert!(dest.join("Alice/media").join(&media).is_file());

    let group = transcript(&dest, "Book Club");
    assert!(group.contains("] Bob: chapter 3  \n"));
    assert_eq!(
        fs::read_to_string(dest.join("Book Club/members.txt")).unwrap(),
        "Alice\nBob\n"
    );

    assert_eq!(summary.views, 2);
    assert!(dest.join("style.css").is_file());
    let html = fs::read_to_string(dest.join("Alice/index.html")).unwrap();
    assert!(html.contains("<div class=page id=pg0>"));
    assert!(html.contains("class='msg me'"));
}

#[test]
fn existing_destination_is_kept_without_overwrite() {
    let fx = fixture();
    let dest = fx.out.join("export");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("keep.txt"), "x").unwrap();

    let err = execute_with_source(&config(&dest, &fx.source), &mut store()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExportError>(),
        Some(ExportError::DestinationExists { .. })
    ));
    assert!(dest.join("keep.txt").exists());

    let cfg = ExportConfig {
        overwrite: true,
        ..config(&dest, &fx.source)
    };
    execute_with_source(&cfg, &mut store()).unwrap();
    assert!(!dest.join("keep.txt").exists());
    assert!(dest.join("Alice/index.md").is_file());
}

#[test]
fn listing_chats_writes_nothing() {
    let fx = fixture();
    let dest = fx.out.join("export");
    let cfg = ExportConfig {
        list_chats: true,
        ..config(&dest, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();
    assert_eq!(
        summary.chats,
        Some(vec!["Alice".to_string(), "Bob".to_string(), "Book Club".to_string()])
    );
    assert!(!dest.exists());
}

#[test]
fn chats_and_conversation_selector_restrict_output() {
    let fx = fixture();
    let dest = fx.out.join("chats");
    let cfg = ExportConfig {
        chats: Some(vec!["Book Club".into()]),
        ..config(&dest, &fx.source)
    };
    execute_with_source(&cfg, &mut store()).unwrap();
    assert!(dest.join("Book Club/index.md").is_file());
    assert!(!dest.join("Alice").exists());

    // The selector ignores the attachments filter.
    let dest = fx.out.join("selected");
    let cfg = ExportConfig {
        conversation: Some("c1".into()),
        attachments_only: true,
        ..config(&dest, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();
    assert_eq!(summary.export.messages, 3);
    assert!(!dest.join("Book Club").exists());
}

#[test]
fn attachments_only_keeps_messages_with_media() {
    let fx = fixture();
    let dest = fx.out.join("export");
    let cfg = ExportConfig {
        attachments_only: true,
        ..config(&dest, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();
    assert_eq!(summary.export.messages, 1);
    assert_eq!(summary.export.attachments_copied, 1);
    assert!(transcript(&dest, "Alice").contains("look"));
}

#[test]
fn merging_the_same_export_twice_changes_nothing() {
    let fx = fixture();
    let first = fx.out.join("first");
    execute_with_source(&config(&first, &fx.source), &mut store()).unwrap();

    let second = fx.out.join("second");
    let cfg = ExportConfig {
        old: Some(first.clone()),
        ..config(&second, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();

    let merge = summary.merge.unwrap();
    assert_eq!(merge.merged, 2);
    assert_eq!(merge.failed, 0);
    assert_eq!(merge.media_conflicts, 0);
    for conversation in ["Alice", "Book Club"] {
        assert_eq!(transcript(&first, conversation), transcript(&second, conversation));
    }
}

#[test]
fn merge_keeps_old_records_first_and_old_only_conversations() {
    let fx = fixture();
    let old = fx.out.join("old");
    let mut early = store();
    early.messages.truncate(1);
    execute_with_source(&config(&old, &fx.source), &mut early).unwrap();
    fs::create_dir_all(old.join("Carol")).unwrap();
    fs::write(old.join("Carol/index.md"), "[2020-01-01 00:00] Carol: old  \n").unwrap();

    let dest = fx.out.join("new");
    let cfg = ExportConfig {
        old: Some(old),
        year: Some(2024),
        ..config(&dest, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();
    let merge = summary.merge.unwrap();
    assert_eq!(merge.copied, 1);

    let alice = transcript(&dest, "Alice");
    assert_eq!(alice.matches("Alice: hi").count(), 1);
    assert!(alice.starts_with(&format!("[{}] Alice: hi", format_timestamp(T1))));
    assert!(dest.join("Carol/index.html").is_file());
}

#[test]
fn corrupt_old_transcript_leaves_new_one_in_place() {
    let fx = fixture();
    let old = fx.out.join("old");
    fs::create_dir_all(old.join("Alice")).unwrap();
    fs::write(old.join("Alice/index.md"), "no header here\n").unwrap();

    let dest = fx.out.join("new");
    let cfg = ExportConfig {
        old: Some(old),
        ..config(&dest, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut store()).unwrap();
    assert_eq!(summary.merge.unwrap().failed, 1);
    assert!(transcript(&dest, "Alice").starts_with(&format!("[{}]", format_timestamp(T1))));
}

#[test]
fn nameless_attachments_keep_their_names_across_merged_runs() {
    let fx = fixture();
    let nameless = || StaticSource {
        conversations: vec![private("c1", "Alice", "+100")],
        messages: vec![row(
            "c1",
            &format!(
                r#"{{"id": "m1", "type": "incoming", "body": "pic", "timestamp": {T1},
                    "attachments": [{{"contentType": "image/png", "path": "ab/cat"}}]}}"#
            ),
        )],
    };

    let first = fx.out.join("first");
    execute_with_source(&config(&first, &fx.source), &mut nameless()).unwrap();

    let second = fx.out.join("second");
    let cfg = ExportConfig {
        old: Some(first.clone()),
        ..config(&second, &fx.source)
    };
    let summary = execute_with_source(&cfg, &mut nameless()).unwrap();
    assert_eq!(summary.merge.unwrap().media_copied, 0);

    assert_eq!(transcript(&first, "Alice"), transcript(&second, "Alice"));
    assert_eq!(transcript(&second, "Alice").lines().count(), 1);
    let media: Vec<_> = fs::read_dir(second.join("Alice/media")).unwrap().collect();
    assert_eq!(media.len(), 1);
}
