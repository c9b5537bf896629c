//! Optional per-message content filter backed by an external program.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{ExportError, Result};

/// Yes/no verdict on a message body.
pub trait Classifier {
    fn classify(&self, body: &str) -> Result<bool>;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> bool,
{
    fn classify(&self, body: &str) -> Result<bool> {
        Ok(self(body))
    }
}

/// Runs a command per message, feeding the body on stdin.
///
/// The first word of stdout decides: `TRUE` keeps the message, anything else
/// drops it. A model prompt wrapper that answers `TRUE.\nJUSTIFICATION = ...`
/// works as-is.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, body: &str) -> Result<bool> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take();
        // Feed stdin on its own thread so a command echoing a large body
        // never blocks on a full stdout pipe.
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> std::io::Result<()> {
                let Some(mut stdin) = stdin else {
                    return Ok(());
                };
                stdin.write_all(body.as_bytes())?;
                stdin.write_all(b"\n")
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (written, output)
        });
        let output = output?;
        // Programs that answer without reading stdin close it early.
        if let Err(e) = written
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        if !output.status.success() {
            return Err(ExportError::Classifier(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(verdict(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Interpret a free-text answer whose first word is the verdict.
pub fn verdict(response: &str) -> bool {
    response
        .split_whitespace()
        .next()
        .map(|w| w.trim_end_matches(|c: char| c.is_ascii_punctuation()))
        .is_some_and(|w| w.eq_ignore_ascii_case("true"))
}
