//! Crawl progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.
//! The crawler's recording task emits an event every
//! [`REPORT_EVERY`] files and once more when the run finishes.

use std::io::Write;

/// Files processed between two `Extracting` events.
pub const REPORT_EVERY: usize = 100;

/// A single progress event for a crawl.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrawlProgressEvent {
    /// The walk of `root` has started. Total unknown.
    Discovering { root: String },
    /// `processed` files have an outcome so far.
    Extracting {
        root: String,
        processed: u64,
        failed: u64,
    },
    /// A batch left the publisher.
    Published {
        batch: u64,
        records: u64,
        ok: bool,
    },
    Finished {
        root: String,
        succeeded: u64,
        skipped: u64,
        failed: u64,
        cancelled: bool,
    },
}

/// Reports crawl progress. Called from the recording and publishing tasks.
pub trait CrawlProgressReporter: Send + Sync {
    fn report(&self, event: CrawlProgressEvent);
}

/// Human-friendly progress on stderr: "crawl /data  extracting  1,234 files (2 failed)".
pub struct StderrProgress;

impl CrawlProgressReporter for StderrProgress {
    fn report(&self, event: CrawlProgressEvent) {
        let line = match &event {
            CrawlProgressEvent::Discovering { root } => format!("crawl {}  discovering...\n", root),
            CrawlProgressEvent::Extracting {
                root,
                processed,
                failed,
            } => format!(
                "crawl {}  extracting  {} files ({} failed)\n",
                root,
                format_number(*processed),
                format_number(*failed)
            ),
            CrawlProgressEvent::Published { batch, records, ok } => format!(
                "publish  batch {}  {} records  {}\n",
                batch,
                format_number(*records),
                if *ok { "ok" } else { "FAILED" }
            ),
            CrawlProgressEvent::Finished {
                root,
                succeeded,
                skipped,
                failed,
                cancelled,
            } => format!(
                "crawl {}  {}  {} ok, {} skipped, {} failed\n",
                root,
                if *cancelled { "cancelled" } else { "done" },
                format_number(*succeeded),
                format_number(*skipped),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl CrawlProgressReporter for JsonProgress {
    fn report(&self, event: CrawlProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &CrawlProgressEvent) -> serde_json::Value {
    match event {
        CrawlProgressEvent::Discovering { root } => serde_json::json!({
            "event": "progress",
            "root": root,
            "phase": "discovering"
        }),
        CrawlProgressEvent::Extracting {
            root,
            processed,
            failed,
        } => serde_json::json!({
            "event": "progress",
            "root": root,
            "phase": "extracting",
            "processed": processed,
            "failed": failed
        }),
        CrawlProgressEvent::Published { batch, records, ok } => serde_json::json!({
            "event": "progress",
            "phase": "publishing",
            "batch": batch,
            "records": records,
            "ok": ok
        }),
        CrawlProgressEvent::Finished {
            root,
            succeeded,
            skipped,
            failed,
            cancelled,
        } => serde_json::json!({
            "event": "finished",
            "root": root,
            "succeeded": succeeded,
            "skipped": skipped,
            "failed": failed,
            "cancelled": cancelled
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl CrawlProgressReporter for NoProgress {
    fn report(&self, _event: CrawlProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode: off, human (stderr), or JSON (stderr).
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

    pub fn reporter(&self) -> Box<dyn CrawlProgressReporter> {
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
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events_carry_phase() {
        let v = event_json(&CrawlProgressEvent::Extracting {
            root: "/data".into(),
            processed: 5,
            failed: 1,
        });
        assert_eq!(v["phase"], "extracting");
        assert_eq!(v["processed"], 5);

        let done = event_json(&CrawlProgressEvent::Finished {
            root: "/data".into(),
            succeeded: 4,
            skipped: 0,
            failed: 1,
            cancelled: true,
        });
        assert_eq!(done["event"], "finished");
        assert_eq!(done["cancelled"], true);
    }
}
