//! Module gating
//!
//! Module 1 is always open. Every later module opens once the learner's most
//! recent attempt at the previous module's quiz passed. Nothing here is
//! cached: each call reads the latest attempt, so a fresh submission is
//! reflected on the next load.

use std::sync::Arc;

use tracing::warn;

use crate::error::StoreError;
use crate::model::ModuleQuiz;
use crate::store::QuizStore;

/// Is `module_number` accessible given the previous module's quiz outcome?
pub fn is_unlocked(module_number: u32, previous_module_passed: bool) -> bool {
    module_number <= 1 || previous_module_passed
}

/// The module's quiz, or `None` when it is missing or malformed
///
/// A malformed quiz cannot be taken, so it is treated like a missing one.
pub async fn usable_quiz(
    quizzes: &dyn QuizStore,
    course_slug: &str,
    module_number: u32,
) -> Result<Option<ModuleQuiz>, StoreError> {
    match quizzes.quiz(course_slug, module_number).await {
        Err(StoreError::Malformed(reason)) => {
            warn!("Ignoring quiz for {} module {}: {}", course_slug, module_number, reason);
            Ok(None)
        }
        other => other,
    }
}

/// Reads quiz outcomes to decide module access
#[derive(Clone)]
pub struct ModuleGate {
    quizzes: Arc<dyn QuizStore>,
}

impl ModuleGate {
    pub fn new(quizzes: Arc<dyn QuizStore>) -> Self {
        Self { quizzes }
    }

    /// Did the latest attempt at `module_number`'s quiz pass?
    ///
    /// No quiz, no attempt, or no user all count as not passed.
    pub async fn module_passed(
        &self,
        user_id: Option<&str>,
        course_slug: &str,
        module_number: u32,
    ) -> Result<bool, StoreError> {
        let Some(user_id) = user_id else {
            return Ok(false);
        };
        let quiz = usable_quiz(self.quizzes.as_ref(), course_slug, module_number).await?;
        let Some(quiz) = quiz else {
            return Ok(false);
        };
        let latest = self.quizzes.latest_attempt(user_id, &quiz.id).await?;
        Ok(latest.is_some_and(|a| a.passed))
    }

    /// Is `module_number` accessible to the user?
    pub async fn is_module_unlocked(
        &self,
        user_id: Option<&str>,
        course_slug: &str,
        module_number: u32,
    ) -> Result<bool, StoreError> {
        if module_number <= 1 {
            return Ok(true);
        }
        let passed = self.module_passed(user_id, course_slug, module_number - 1).await?;
        Ok(is_unlocked(module_number, passed))
    }
}
