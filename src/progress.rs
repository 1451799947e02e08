//! Sync progress reporting.
//!
//! Reports what `vsync sync` is doing so users see which notes are being
//! uploaded and when the vector store has caught up. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Reading the vault and the remote listing.
    Discovering,
    /// A note was uploaded; `n` counts uploads so far in this pass.
    Uploaded { path: String, n: u64 },
    /// Attaching pending uploads to the vector store.
    Flushing { pending: u64 },
    /// The pass finished.
    Done { uploaded: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  uploaded  12  daily/today.md".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &SyncProgressEvent) -> String {
    match event {
        SyncProgressEvent::Discovering => "sync  discovering...\n".to_string(),
        SyncProgressEvent::Uploaded { path, n } => {
            format!("sync  uploaded  {}  {}\n", format_number(*n), path)
        }
        SyncProgressEvent::Flushing { pending } => {
            format!("sync  indexing  {} file(s)\n", format_number(*pending))
        }
        SyncProgressEvent::Done { uploaded } => {
            format!("sync  done  {} uploaded\n", format_number(*uploaded))
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering => serde_json::json!({
                "event": "progress",
                "phase": "discovering"
            }),
            SyncProgressEvent::Uploaded { path, n } => serde_json::json!({
                "event": "progress",
                "phase": "uploading",
                "path": path,
                "n": n
            }),
            SyncProgressEvent::Flushing { pending } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "pending": pending
            }),
            SyncProgressEvent::Done { uploaded } => serde_json::json!({
                "event": "done",
                "uploaded": uploaded
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse a `--progress` value. `auto` picks [`default_for_tty`](Self::default_for_tty).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => Err(format!(
                "invalid progress mode '{}': expected auto, human, json or off",
                other
            )),
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
