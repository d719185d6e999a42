//! Module quiz engine: loads quizzes, checks access, stores attempts

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::session::{QuizResult, QuizSession};
use crate::error::{AuthFailure, ProgressionError, StoreError};
use crate::events::{EventSender, ProgressEvent, publish};
use crate::gate::{ModuleGate, usable_quiz};
use crate::identity::{EnrollmentService, Viewer};
use crate::model::{ModuleQuiz, QuizAttempt, QuizQuestion};
use crate::store::QuizStore;

/// What the quiz start screen shows
#[derive(Debug, Clone, PartialEq)]
pub struct QuizOverview {
    pub quiz: ModuleQuiz,
    pub question_count: usize,
    /// Most recent prior attempt
    pub last_attempt: Option<QuizAttempt>,
    /// A previous attempt exists, so the start button reads "retake"
    pub retake_offered: bool,
}

/// Runs module quizzes end to end
pub struct QuizEngine {
    quizzes: Arc<dyn QuizStore>,
    enrollment: Arc<dyn EnrollmentService>,
    gate: ModuleGate,
    events: EventSender,
    enforce_time_limit: bool,
}

impl QuizEngine {
    pub fn new(
        quizzes: Arc<dyn QuizStore>,
        enrollment: Arc<dyn EnrollmentService>,
        events: EventSender,
        enforce_time_limit: bool,
    ) -> Self {
        let gate = ModuleGate::new(Arc::clone(&quizzes));
        Self { quizzes, enrollment, gate, events, enforce_time_limit }
    }

    /// Load the quiz for a module along with the learner's last attempt
    pub async fn overview(
        &self,
        viewer: &Viewer,
        course_slug: &str,
        module_number: u32,
    ) -> Result<QuizOverview, ProgressionError> {
        let user_id = self.authorize(viewer, course_slug, module_number).await?;
        let quiz = self.load_quiz(course_slug, module_number).await?;
        let question_count = self.load_questions(&quiz).await?.len();
        if question_count == 0 {
            return Err(no_questions(course_slug, module_number));
        }
        let last_attempt = self.quizzes.latest_attempt(user_id, &quiz.id).await?;

        Ok(QuizOverview {
            retake_offered: last_attempt.is_some(),
            quiz,
            question_count,
            last_attempt,
        })
    }

    /// Begin a fresh session
    pub async fn start(
        &self,
        viewer: &Viewer,
        course_slug: &str,
        module_number: u32,
        now: DateTime<Utc>,
    ) -> Result<QuizSession, ProgressionError> {
        let user_id = self.authorize(viewer, course_slug, module_number).await?;
        let quiz = self.load_quiz(course_slug, module_number).await?;
        let questions = self.load_questions(&quiz).await?;
        if questions.is_empty() {
            return Err(no_questions(course_slug, module_number));
        }

        let mut session = QuizSession::new(user_id, quiz, questions)?;
        session.start(now);
        Ok(session)
    }

    /// Grade the session, append the attempt, and move it to `Submitted`
    ///
    /// If the write fails the session stays in progress with its answers,
    /// so the learner can submit again.
    pub async fn submit(
        &self,
        session: &mut QuizSession,
        now: DateTime<Utc>,
    ) -> Result<QuizResult, ProgressionError> {
        let result = session.grade_submission(now, self.enforce_time_limit)?;

        if let Err(e) = self.quizzes.insert_attempt(result.attempt.clone()).await {
            warn!("Failed to store attempt for quiz {}: {}", session.quiz().id, e);
            return Err(e.into());
        }
        info!(
            "Quiz {} submitted by {}: {}% ({})",
            session.quiz().id,
            session.user_id(),
            result.attempt.score,
            if result.attempt.passed { "passed" } else { "failed" }
        );

        publish(
            &self.events,
            ProgressEvent::QuizSubmitted {
                user_id: session.user_id().to_string(),
                course_slug: session.quiz().course_slug.clone(),
                module_number: session.quiz().module_number,
                score: result.attempt.score,
                passed: result.attempt.passed,
            },
        );

        session.finish(result.clone());
        Ok(result)
    }

    /// Signed in, enrolled, and the module is unlocked
    async fn authorize<'v>(
        &self,
        viewer: &'v Viewer,
        course_slug: &str,
        module_number: u32,
    ) -> Result<&'v str, ProgressionError> {
        let user_id = viewer.require_user()?;
        if !self.enrollment.is_enrolled(user_id, course_slug).await? {
            return Err(AuthFailure::NotEnrolled { course_slug: course_slug.to_string() }.into());
        }
        if !self.gate.is_module_unlocked(Some(user_id), course_slug, module_number).await? {
            return Err(AuthFailure::ModuleLocked {
                module_number,
                previous_module: module_number - 1,
            }
            .into());
        }
        Ok(user_id)
    }

    async fn load_quiz(
        &self,
        course_slug: &str,
        module_number: u32,
    ) -> Result<ModuleQuiz, ProgressionError> {
        let quiz = usable_quiz(self.quizzes.as_ref(), course_slug, module_number).await?;
        quiz.ok_or_else(|| {
            ProgressionError::not_found(format!("quiz for {course_slug} module {module_number}"))
        })
    }

    /// Questions that fail validation leave the quiz unavailable
    async fn load_questions(&self, quiz: &ModuleQuiz) -> Result<Vec<QuizQuestion>, ProgressionError> {
        match self.quizzes.questions(&quiz.id).await {
            Ok(questions) => Ok(questions),
            Err(StoreError::Malformed(reason)) => {
                warn!("Quiz {} has malformed questions: {}", quiz.id, reason);
                Err(ProgressionError::not_found(format!("valid questions for quiz {}", quiz.id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn no_questions(course_slug: &str, module_number: u32) -> ProgressionError {
    ProgressionError::not_found(format!("questions for {course_slug} module {module_number}"))
}
