//! Learner activity trackers: lesson completion and video watching

pub mod lesson;
pub mod video;

// Re-exports
pub use lesson::{CourseProgress, LessonCompletionTracker, ToggleOutcome};
pub use video::{PlaybackState, VideoPlayer, VideoSession, VideoWatchTracker};
