use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of what happened during one run
pub struct Transcript {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Transcript {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn session_started(&mut self, duration: u32) -> Result<()> {
        self.log("session_started", serde_json::json!({ "duration": duration }))
    }

    /// Pause, resume, stop or reset, with the remaining seconds at that moment
    pub fn session_transition(&mut self, event_type: &str, remaining: u32) -> Result<()> {
        self.log(event_type, serde_json::json!({ "remaining": remaining }))
    }

    pub fn session_expired(&mut self, duration: u32) -> Result<()> {
        self.log("session_expired", serde_json::json!({ "duration": duration }))
    }

    pub fn session_completed(
        &mut self,
        duration: u32,
        mood: &str,
        rating: u8,
        current_streak: u32,
    ) -> Result<()> {
        self.log(
            "session_completed",
            serde_json::json!({
                "duration": duration,
                "mood": mood,
                "rating": rating,
                "current_streak": current_streak,
            }),
        )
    }

    pub fn completion_failed(&mut self, error: &str) -> Result<()> {
        self.log("completion_failed", serde_json::json!({ "error": error }))
    }

    pub fn achievement_unlocked(&mut self, id: &str, title: &str) -> Result<()> {
        self.log(
            "achievement_unlocked",
            serde_json::json!({ "id": id, "title": title }),
        )
    }

    pub fn signed_in(&mut self, user_id: &str) -> Result<()> {
        self.log("signed_in", serde_json::json!({ "user_id": user_id }))
    }

    pub fn signed_out(&mut self, user_id: &str) -> Result<()> {
        self.log("signed_out", serde_json::json!({ "user_id": user_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut transcript = Transcript::new(&path, "run-1").unwrap();

        transcript.session_started(600).unwrap();
        transcript.session_transition("session_paused", 420).unwrap();
        transcript.session_completed(600, "Calm", 4, 3).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "session_started");
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[1]["remaining"], 420);
        assert_eq!(lines[2]["mood"], "Calm");
        assert_eq!(lines[2]["current_streak"], 3);
    }

    #[test]
    fn test_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        Transcript::new(&path, "a").unwrap().signed_in("u-1").unwrap();
        Transcript::new(&path, "b").unwrap().signed_out("u-1").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
