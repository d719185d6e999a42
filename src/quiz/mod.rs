//! Module quizzes: session state machine, grading, and the engine that
//! stores attempts

pub mod engine;
pub mod grading;
pub mod session;

// Re-exports
pub use engine::{QuizEngine, QuizOverview};
pub use grading::{Grade, QuestionOutcome};
pub use session::{QuizError, QuizPhase, QuizResult, QuizSession};
