//! Lessonpath - course progression and certification engine
//!
//! Tracks lesson completion and watched video time, runs module quizzes,
//! gates each module behind the previous module's quiz, and issues a
//! course certificate exactly once when every lesson is complete.

pub mod certificate;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod identity;
pub mod model;
pub mod progression;
pub mod quiz;
pub mod store;
pub mod tracker;

pub use certificate::{CertificateIssuer, IssueOutcome, IssueReport};
pub use config::Config;
pub use error::{AuthFailure, ProgressionError, StoreError};
pub use events::ProgressEvent;
pub use identity::Viewer;
pub use progression::{CourseProgression, CourseView, LessonAccess, Services};
pub use quiz::{QuizEngine, QuizError, QuizSession};
pub use store::{JsonStore, MemoryStore};
