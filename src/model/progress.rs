//! Per-learner lesson progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one learner on one lesson, unique per (user, lesson)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    /// Learner identifier
    pub user_id: String,
    /// Lesson identifier
    pub lesson_id: String,
    /// Has the learner marked (or watched) this lesson as complete?
    pub completed: bool,
    /// When the lesson was completed, cleared when un-completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Last persisted playback position
    pub video_progress_seconds: u32,
    /// Share of the video watched (0-100)
    pub video_watched_percentage: u8,
    /// Last interaction of any kind
    pub last_accessed_at: DateTime<Utc>,
}

impl LessonProgress {
    /// Fresh row created on first interaction
    pub fn new(user_id: impl Into<String>, lesson_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            lesson_id: lesson_id.into(),
            completed: false,
            completed_at: None,
            video_progress_seconds: 0,
            video_watched_percentage: 0,
            last_accessed_at: now,
        }
    }

    /// Apply a write to this row. Every write touches `last_accessed_at`.
    pub fn apply(&mut self, patch: &ProgressPatch, now: DateTime<Utc>) {
        match *patch {
            ProgressPatch::Completion { completed } => {
                self.completed = completed;
                self.completed_at = completed.then_some(now);
            }
            ProgressPatch::Video { position_seconds, watched_percentage } => {
                self.video_progress_seconds = position_seconds;
                self.video_watched_percentage = watched_percentage.min(100);
            }
        }
        self.last_accessed_at = now;
    }

    /// Position to seek the player to when the lesson is reopened
    pub fn resume_position(&self) -> Option<u32> {
        (self.video_progress_seconds > 0).then_some(self.video_progress_seconds)
    }
}

/// The fields a single upsert changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPatch {
    /// Mark complete or incomplete
    Completion { completed: bool },
    /// Record the watched position of the lesson video
    Video { position_seconds: u32, watched_percentage: u8 },
}

impl ProgressPatch {
    /// Build a video patch from raw player readings
    pub fn video(position_seconds: f64, duration_seconds: f64) -> Self {
        Self::Video {
            position_seconds: position_seconds.max(0.0).floor() as u32,
            watched_percentage: watched_percentage(position_seconds, duration_seconds),
        }
    }
}

/// Watched share of a video as an integer percentage in [0, 100]
pub fn watched_percentage(position_seconds: f64, duration_seconds: f64) -> u8 {
    if duration_seconds.is_nan() || duration_seconds <= 0.0 || !position_seconds.is_finite() {
        return 0;
    }
    ((position_seconds / duration_seconds) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Course completion as an integer percentage; an empty course is 0%
pub fn progress_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
