/// Odds harvest — Logger
/// JSONL run journal, NTFY alerts

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Appends one JSON line to today's `{YYYY-MM-DD}.jsonl`
    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct RunStartedEvent {
    pub ts:         String,
    pub event:      &'static str,   // "RUN_STARTED"
    pub run_id:     i64,
    pub sports:     Vec<String>,
    pub leagues:    Vec<String>,
    pub start_date: String,
    pub end_date:   String,
}

#[derive(Serialize, Debug)]
pub struct SeasonDiscoveredEvent {
    pub ts:        String,
    pub event:     &'static str,    // "SEASON_DISCOVERED"
    pub run_id:    i64,
    pub target_id: String,
    pub season:    String,
    pub url:       String,
    pub pages:     u32,
}

#[derive(Serialize, Debug)]
pub struct TargetFailedEvent {
    pub ts:        String,
    pub event:     &'static str,    // "TARGET_FAILED"
    pub run_id:    i64,
    pub target_id: String,
    pub url:       String,
    pub reason:    String,
    pub failed:    usize,
    pub planned:   usize,
}

#[derive(Serialize, Debug)]
pub struct RunFinishedEvent {
    pub ts:              String,
    pub event:           &'static str,   // "RUN_FINISHED"
    pub run_id:          i64,
    pub outcome:         String,         // "completed" | "aborted" | "cancelled"
    pub planned:         usize,
    pub processed:       usize,
    pub skipped:         usize,
    pub failed:          usize,
    pub records_written: usize,
    pub failed_targets:  Vec<String>,
}

/// Push a readable alert to an ntfy topic
pub async fn send_ntfy_alert(topic: &str, msg: &str, title: &str) {
    let client = reqwest::Client::new();
    match client
        .post(format!("https://ntfy.sh/{topic}"))
        .header("Title", title)
        .header("Priority", "high")
        .header("Tags", "warning")
        .body(msg.to_string())
        .send()
        .await
    {
        Ok(_)  => tracing::info!("NTFY sent: {}", title),
        Err(e) => tracing::warn!("NTFY failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path().join("logs"));

        for failed in 1..=2 {
            logger
                .log(&TargetFailedEvent {
                    ts:        now_iso(),
                    event:     "TARGET_FAILED",
                    run_id:    7,
                    target_id: "football/england/premier-league/2023-2024/page-2".into(),
                    url:       "https://www.oddsportal.com/football/england/premier-league-2023-2024/results/#/page/2".into(),
                    reason:    "navigation failed".into(),
                    failed,
                    planned:   10,
                })
                .unwrap();
        }

        // whichever day files the events landed in, in name order
        let mut files: Vec<PathBuf> = fs::read_dir(logger.log_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        assert!(!files.is_empty());
        let content: String = files.iter().map(|f| fs::read_to_string(f).unwrap()).collect();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "TARGET_FAILED");
        assert_eq!(lines[1]["failed"], 2);
        assert_eq!(lines[1]["run_id"], 7);
    }
}
