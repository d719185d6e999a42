//! Progress events
//!
//! Side effects that must not hold up the action that caused them
//! (certificate issuance after the last lesson, gate refresh after a quiz)
//! are driven by these events instead of being called inline.

use tokio::sync::broadcast;

/// Something changed in a learner's progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A lesson was marked complete
    LessonCompleted { user_id: String, course_slug: String, lesson_id: String },

    /// A completed lesson was un-marked
    LessonReopened { user_id: String, course_slug: String, lesson_id: String },

    /// Every lesson of the course is now complete
    CourseCompleted { user_id: String, email: Option<String>, course_slug: String },

    /// A quiz attempt was graded and stored
    QuizSubmitted {
        user_id: String,
        course_slug: String,
        module_number: u32,
        score: u8,
        passed: bool,
    },
}

/// Sending half shared by the trackers and the quiz engine
pub type EventSender = broadcast::Sender<ProgressEvent>;

/// Create the event channel
pub fn channel(capacity: usize) -> EventSender {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    tx
}

/// Publish an event; having no subscribers is not an error
pub fn publish(tx: &EventSender, event: ProgressEvent) {
    if tx.send(event).is_err() {
        tracing::debug!("No subscribers for progress event");
    }
}
