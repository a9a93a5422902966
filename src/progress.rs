//! Plan and sync progress reporting.
//!
//! Reports observable progress during `carryover plan` and `carryover sync`
//! so operators see which group is being reconciled or written and how many
//! are left. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts (`plan --json`).

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    /// Reading the content source. Group count unknown yet.
    Loading { source: String },
    /// Group n of total is being listed and matched.
    Reconciling { group: String, n: u64, total: u64 },
    /// Group n of total is being written.
    Applying { group: String, n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync pipeline.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "sync  applying  3 / 12 groups  topic-a".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = std::io::stderr().lock().write_all(human_line(&event).as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Loading { source } => format!("sync  loading {}...\n", source),
        ProgressEvent::Reconciling { group, n, total } => format!(
            "sync  reconciling  {} / {} groups  {}\n",
            format_number(*n),
            format_number(*total),
            group
        ),
        ProgressEvent::Applying { group, n, total } => format!(
            "sync  applying  {} / {} groups  {}\n",
            format_number(*n),
            format_number(*total),
            group
        ),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn json_event(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Loading { source } => serde_json::json!({
            "event": "progress",
            "phase": "loading",
            "source": source
        }),
        ProgressEvent::Reconciling { group, n, total } => serde_json::json!({
            "event": "progress",
            "phase": "reconciling",
            "group": group,
            "n": n,
            "total": total
        }),
        ProgressEvent::Applying { group, n, total } => serde_json::json!({
            "event": "progress",
            "phase": "applying",
            "group": group,
            "n": n,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_line_applying() {
        let line = human_line(&ProgressEvent::Applying {
            group: "topic-a".into(),
            n: 3,
            total: 1200,
        });
        assert_eq!(line, "sync  applying  3 / 1,200 groups  topic-a\n");
    }

    #[test]
    fn json_event_reconciling() {
        let v = json_event(&ProgressEvent::Reconciling {
            group: "g".into(),
            n: 1,
            total: 2,
        });
        assert_eq!(v["phase"], "reconciling");
        assert_eq!(v["group"], "g");
        assert_eq!(v["total"], 2);
    }
}
