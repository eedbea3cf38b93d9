//! UI controller: the Idle/Submitting state machine and the client-local transcript.
//!
//! Nothing here talks to the network. A UI calls [`Console::submit_command`] or
//! [`Console::submit_script`], performs the returned [`Submission`] however it likes, and feeds
//! the result back through [`Console::complete`]. The transcript lives only as long as the
//! `Console` value.

use crate::client::{ApiReply, Submission};
use crate::gate::COMMAND_SUCCESS_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Command,
    Output,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub text: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
}

impl TranscriptEntry {
    pub fn new(kind: EntryKind, text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: timestamp.into(),
        }
    }

    fn now(kind: EntryKind, text: impl Into<String>) -> Self {
        Self::new(kind, text, chrono::Local::now().format("%H:%M:%S").to_string())
    }
}

/// Ordered list of entries.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// `[<timestamp>] <text>` per entry, newline separated.
    pub fn to_log_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("[{}] {}", e.timestamp, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An exported transcript ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogExport {
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Idle,
    Submitting,
}

#[derive(Debug, Clone, Default)]
pub struct Console {
    /// Current text in the command input.
    pub input: String,
    transcript: Transcript,
    in_flight: Option<Submission>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConsoleState {
        if self.in_flight.is_some() {
            ConsoleState::Submitting
        } else {
            ConsoleState::Idle
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Whether the Run control should be enabled.
    pub fn can_submit(&self) -> bool {
        self.in_flight.is_none() && !self.input.trim().is_empty()
    }

    /// Start a command from the input box. Ignored (None) when the input is blank or a call is in flight.
    pub fn submit_command(&mut self) -> Option<Submission> {
        if !self.can_submit() {
            return None;
        }
        let command = self.input.clone();
        self.transcript
            .push(TranscriptEntry::now(EntryKind::Command, format!("$ {}", command)));
        Some(self.begin(Submission::Command(command)))
    }

    /// Start a named script. Ignored (None) while a call is in flight.
    pub fn submit_script(&mut self, script_name: &str) -> Option<Submission> {
        if self.in_flight.is_some() {
            return None;
        }
        self.transcript.push(TranscriptEntry::now(
            EntryKind::Command,
            format!("$ Running {}...", script_name),
        ));
        Some(self.begin(Submission::Script(script_name.to_string())))
    }

    fn begin(&mut self, submission: Submission) -> Submission {
        self.in_flight = Some(submission.clone());
        submission
    }

    /// Finish the in-flight call: append exactly one output or error entry and return to Idle.
    /// `Err` is a transport failure (no response body). Ignored when nothing is in flight.
    pub fn complete(&mut self, result: Result<ApiReply, String>) {
        let Some(submission) = self.in_flight.take() else {
            return;
        };
        let entry = match result {
            Ok(ApiReply {
                error: Some(error), ..
            }) => TranscriptEntry::now(EntryKind::Error, error),
            Ok(reply) => TranscriptEntry::now(
                EntryKind::Output,
                reply
                    .output
                    .filter(|o| !o.is_empty())
                    .unwrap_or_else(|| COMMAND_SUCCESS_MESSAGE.to_string()),
            ),
            Err(e) => TranscriptEntry::now(EntryKind::Error, format!("Error: {}", e)),
        };
        self.transcript.push(entry);
        if matches!(submission, Submission::Command(_)) {
            self.input.clear();
        }
    }

    /// Drop every entry. Local only.
    pub fn clear(&mut self) {
        self.transcript.clear();
    }

    /// Plain-text export named `terminal-log-<epoch ms>.txt`. An empty transcript exports an empty file.
    pub fn export_log(&self, epoch_ms: u128) -> LogExport {
        LogExport {
            file_name: format!("terminal-log-{}.txt", epoch_ms),
            contents: self.transcript.to_log_text(),
        }
    }
}
