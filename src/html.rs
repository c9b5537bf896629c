//! Paginated HTML view of a finished transcript.
//!
//! Each record becomes a `.msg` block; bodies go through the markdown
//! renderer, then images are turned into lightbox figures, links to audio and
//! video files into inline players, and bare URLs into links. Pages are
//! `<div class=page id=pgN>` blocks selected through the URL fragment.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use eyre::{Context, Result};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, TextMergeStream, html};
use regex::Regex;
use tracing::{debug, error};
use url::Url;

use crate::error::ExportError;
use crate::exporter::{ME, MEMBERS_FILE, TRANSCRIPT_FILE};
use crate::transcript::{self, Record};

pub const VIEW_FILE: &str = "index.html";
pub const STYLESHEET_FILE: &str = "style.css";

const STYLESHEET: &str = include_str!("../assets/style.css");

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Audio,
    Video,
}

/// Number of pages needed for `records` records.
pub fn page_count(records: usize, page_size: usize) -> usize {
    records.div_ceil(page_size.max(1))
}

/// Split records into pages of `page_size` (the last one may be shorter).
pub fn paginate<T>(records: &[T], page_size: usize) -> std::slice::Chunks<'_, T> {
    records.chunks(page_size.max(1))
}

/// Write `style.css` and an `index.html` next to every transcript in `dest`.
///
/// A transcript that fails to parse is reported and gets no view; the other
/// conversations are still rendered. Returns the number of views written.
pub fn write_views(dest: &Path, page_size: usize) -> Result<usize> {
    fs::write(dest.join(STYLESHEET_FILE), STYLESHEET).wrap_err("Failed to write stylesheet")?;

    let mut dirs: Vec<PathBuf> = fs::read_dir(dest)
        .wrap_err_with(|| format!("Failed to read {}", dest.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut written = 0;
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!("Doing html for {}", name);

        let text = match fs::read_to_string(dir.join(TRANSCRIPT_FILE)) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).wrap_err_with(|| format!("Failed to read transcript of {}", name)),
        };
        let members = read_members(&dir);

        match render_document(&name, &members, &text, page_size) {
            Ok(doc) => {
                fs::write(dir.join(VIEW_FILE), doc)
                    .wrap_err_with(|| format!("Failed to write view for {}", name))?;
                written += 1;
            }
            Err(e) => error!("Skipping html for {}: {}", name, e),
        }
    }
    Ok(written)
}

fn read_members(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join(MEMBERS_FILE))
        .map(|s| s.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Full HTML document for one transcript.
pub fn render_document(
    title: &str,
    members: &[String],
    transcript_text: &str,
    page_size: usize,
) -> Result<String, ExportError> {
    let records = transcript::parse(transcript_text)?;
    let title = escape_html(title);
    let pages = page_count(records.len(), page_size);

    let mut out = String::new();
    out.push_str("<!doctype html>\n<html lang='en'><head><meta charset='utf-8'>");
    out.push_str(&format!("<title>{}</title>", title));
    out.push_str("<link rel=stylesheet href='../style.css'></head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", title));
    if !members.is_empty() {
        let names: Vec<String> = members.iter().map(|m| escape_html(m)).collect();
        out.push_str(&format!("<p class=members>{}</p>\n", names.join(", ")));
    }

    for (index, page) in paginate(&records, page_size).enumerate() {
        out.push_str(&format!("<div class=page id=pg{}>\n", index));
        out.push_str(&navigation(index, pages));
        for record in page {
            out.push_str(&render_record(record));
        }
        out.push_str("</div>\n");
    }

    out.push_str(
        "<script>if (!document.location.hash){document.location.hash = 'pg0';}</script>\n",
    );
    out.push_str("</body></html>\n");
    Ok(out)
}

fn navigation(index: usize, pages: usize) -> String {
    let prev = if index > 0 {
        format!("<a href='#pg{}'>previous</a>", index - 1)
    } else {
        "&nbsp;".to_string()
    };
    let next = if index + 1 < pages {
        format!("<a href='#pg{}'>next</a>", index + 1)
    } else {
        "&nbsp;".to_string()
    };
    format!(
        "<nav><div class=prev>{}</div><div class=pos>{} / {}</div><div class=next>{}</div></nav>\n",
        prev,
        index + 1,
        pages,
        next
    )
}

fn render_record(record: &Record) -> String {
    let (date, time) = record.date_time();
    let sender = record.sender_name();
    let class = if sender == ME { "msg me" } else { "msg" };
    format!(
        "<div class='{}'><span class=date>{}</span><span class=time>{}</span>\
         <span class=sender>{}</span><span class=body>{}</span></div>\n",
        class,
        escape_html(&date),
        escape_html(&time),
        escape_html(sender),
        render_body(record.body.trim_start_matches(' '))
    )
}

/// Markdown body to HTML with media handling.
pub fn render_body(text: &str) -> String {
    let mut events: Vec<Event<'_>> = Vec::new();
    let mut figures: Vec<String> = Vec::new();
    let mut link_depth = 0usize;

    let mut iter = TextMergeStream::new(Parser::new_ext(text, Options::empty()));
    while let Some(event) = iter.next() {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                let mut alt = String::new();
                for inner in iter.by_ref() {
                    match inner {
                        Event::End(TagEnd::Image) => break,
                        Event::Text(t) | Event::Code(t) => alt.push_str(&t),
                        _ => {}
                    }
                }
                figures.push(figure(&dest_url, &alt));
            }
            Event::Start(Tag::Link { dest_url, .. }) if media_kind(&dest_url).is_some() => {
                for inner in iter.by_ref() {
                    if matches!(inner, Event::End(TagEnd::Link)) {
                        break;
                    }
                }
                if let Some(kind) = media_kind(&dest_url) {
                    events.push(Event::Html(player(kind, &dest_url).into()));
                }
            }
            Event::Start(Tag::Link { .. }) => {
                link_depth += 1;
                events.push(event);
            }
            Event::End(TagEnd::Link) => {
                link_depth = link_depth.saturating_sub(1);
                events.push(event);
            }
            Event::Text(t) if link_depth == 0 => autolink(&t, &mut events),
            // Raw HTML from a message is shown, never interpreted.
            Event::Html(t) | Event::InlineHtml(t) => events.push(Event::Text(t)),
            other => events.push(other),
        }
    }

    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    if !figures.is_empty() {
        out.push_str("<div class=img-grid>");
        for f in figures {
            out.push_str(&f);
        }
        out.push_str("</div>");
    }
    out
}

/// Push `text` as text events, with bare URLs turned into links.
fn autolink<'a>(text: &str, events: &mut Vec<Event<'a>>) {
    let mut last = 0;
    for m in BARE_URL.find_iter(text) {
        let candidate = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'));
        if Url::parse(candidate).is_err() {
            continue;
        }
        if m.start() > last {
            events.push(Event::Text(CowStr::from(text[last..m.start()].to_string())));
        }
        let href = escape_html(candidate);
        events.push(Event::Html(
            format!("<a href='{0}' target='_blank'>{0}</a>", href).into(),
        ));
        last = m.start() + candidate.len();
    }
    if last < text.len() {
        events.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}

fn media_kind(url: &str) -> Option<MediaKind> {
    let ext = url.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "m4a" | "mp3" | "aac" | "ogg" | "oga" | "opus" | "wav" => Some(MediaKind::Audio),
        "mp4" | "m4v" | "mov" | "webm" => Some(MediaKind::Video),
        _ => None,
    }
}

fn media_mime(url: &str) -> &'static str {
    let ext = url
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "video/mp4",
    }
}

fn player(kind: MediaKind, src: &str) -> String {
    let tag = match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    };
    format!(
        "<{0} controls><source src=\"{1}\" type=\"{2}\"></{0}>",
        tag,
        escape_html(src),
        media_mime(src)
    )
}

fn figure(src: &str, alt: &str) -> String {
    let src = escape_html(src);
    let alt = escape_html(alt);
    format!(
        "<figure><label for=\"{src}\"><img loading=\"lazy\" src=\"{src}\" alt=\"{alt}\"></label>\
         <input class=\"modal-state\" id=\"{src}\" type=\"checkbox\">\
         <div class=\"modal\"><label for=\"{src}\"><div class=\"modal-content\">\
         <img class=\"modal-photo\" loading=\"lazy\" src=\"{src}\" alt=\"{alt}\">\
         </div></label></div></figure>"
    )
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
