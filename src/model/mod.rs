//! Data model shared by the trackers, the quiz engine, and the stores

pub mod certificate;
pub mod lesson;
pub mod progress;
pub mod quiz;

// Re-exports
pub use certificate::Certificate;
pub use lesson::Lesson;
pub use progress::{LessonProgress, ProgressPatch};
pub use quiz::{ModuleQuiz, QuizAttempt, QuizQuestion, RawQuizQuestion};
