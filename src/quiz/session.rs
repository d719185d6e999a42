//! Quiz session state machine
//!
//! `NotStarted -> InProgress -> Submitted`, with retakes returning to a
//! fresh `InProgress`. A session is a plain value owned by the caller;
//! nothing is persisted until the engine stores the attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::grading::{Grade, grade};
use crate::model::{ModuleQuiz, QuizAttempt, QuizQuestion};

/// Session misuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    #[error("This quiz has no questions yet")]
    NoQuestions,

    #[error("Start the quiz first")]
    NotInProgress,

    #[error("Unknown question {0}")]
    UnknownQuestion(String),

    #[error("\"{option}\" is not an option for question {question_id}")]
    UnknownOption { question_id: String, option: String },

    #[error("Answer this question before moving on")]
    Unanswered { question_id: String },

    #[error("Answer all questions before submitting ({missing} left)")]
    Incomplete { missing: usize },

    #[error("The {limit_minutes} minute time limit has passed")]
    TimeLimitExceeded { limit_minutes: u32 },
}

/// Where the session is
#[derive(Debug, Clone, PartialEq)]
pub enum QuizPhase {
    NotStarted,
    InProgress,
    Submitted(Box<QuizResult>),
}

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct QuizResult {
    /// The attempt as stored
    pub attempt: QuizAttempt,
    /// Per-question breakdown
    pub grade: Grade,
    /// Submitted after the advisory time limit
    pub exceeded_time_limit: bool,
}

/// One learner taking one module quiz
#[derive(Debug, Clone)]
pub struct QuizSession {
    user_id: String,
    quiz: ModuleQuiz,
    questions: Vec<QuizQuestion>,
    phase: QuizPhase,
    answers: BTreeMap<String, String>,
    current: usize,
    started_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Create a session; a quiz without questions cannot be taken
    pub fn new(
        user_id: impl Into<String>,
        quiz: ModuleQuiz,
        questions: Vec<QuizQuestion>,
    ) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }
        Ok(Self {
            user_id: user_id.into(),
            quiz,
            questions,
            phase: QuizPhase::NotStarted,
            answers: BTreeMap::new(),
            current: 0,
            started_at: None,
        })
    }

    pub fn quiz(&self) -> &ModuleQuiz {
        &self.quiz
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Begin (or retake) the quiz with no answers
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.phase = QuizPhase::InProgress;
        self.answers.clear();
        self.current = 0;
        self.started_at = Some(now);
    }

    /// Alias of [`start`](Self::start) used from the results screen
    pub fn retake(&mut self, now: DateTime<Utc>) {
        self.start(now);
    }

    /// Index of the question on screen
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        match self.phase {
            QuizPhase::InProgress => self.questions.get(self.current),
            _ => None,
        }
    }

    /// The recorded answer for a question
    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn answered_count(&self) -> usize {
        self.questions.iter().filter(|q| self.answers.contains_key(&q.id)).count()
    }

    /// Record (or change) the answer to a question
    pub fn answer(&mut self, question_id: &str, option: &str) -> Result<(), QuizError> {
        self.require_in_progress()?;
        let question = self
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| QuizError::UnknownQuestion(question_id.to_string()))?;
        if !question.has_option(option) {
            return Err(QuizError::UnknownOption {
                question_id: question_id.to_string(),
                option: option.to_string(),
            });
        }
        self.answers.insert(question_id.to_string(), option.to_string());
        Ok(())
    }

    /// Answer the question on screen
    pub fn answer_current(&mut self, option: &str) -> Result<(), QuizError> {
        let question_id =
            self.current_question().map(|q| q.id.clone()).ok_or(QuizError::NotInProgress)?;
        self.answer(&question_id, option)
    }

    /// Move forward; the current question must be answered
    ///
    /// Stays put on the last question.
    pub fn next(&mut self) -> Result<usize, QuizError> {
        self.require_in_progress()?;
        self.require_answered(self.current)?;
        if self.current + 1 < self.questions.len() {
            self.current += 1;
        }
        Ok(self.current)
    }

    /// Move back; answers are kept
    pub fn previous(&mut self) -> Result<usize, QuizError> {
        self.require_in_progress()?;
        self.current = self.current.saturating_sub(1);
        Ok(self.current)
    }

    /// Jump to a question; every question skipped forward must be answered
    pub fn go_to(&mut self, index: usize) -> Result<usize, QuizError> {
        self.require_in_progress()?;
        if index >= self.questions.len() {
            return Err(QuizError::UnknownQuestion(format!("#{}", index + 1)));
        }
        for skipped in self.current..index {
            self.require_answered(skipped)?;
        }
        self.current = index;
        Ok(self.current)
    }

    /// Seconds since the session started
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.started_at.map(|start| (now - start).num_seconds().max(0) as u64).unwrap_or(0)
    }

    /// Grade the answers without changing the phase
    ///
    /// The engine persists the attempt and only then calls
    /// [`finish`](Self::finish), so a failed write can be retried.
    pub fn grade_submission(
        &self,
        now: DateTime<Utc>,
        enforce_time_limit: bool,
    ) -> Result<QuizResult, QuizError> {
        self.require_in_progress()?;
        let missing = self.questions.len() - self.answered_count();
        if missing > 0 {
            return Err(QuizError::Incomplete { missing });
        }

        let time_taken_seconds = self.elapsed_seconds(now);
        let exceeded_time_limit = self
            .quiz
            .time_limit_minutes
            .is_some_and(|limit| time_taken_seconds > u64::from(limit) * 60);
        if exceeded_time_limit && enforce_time_limit {
            let limit_minutes = self.quiz.time_limit_minutes.unwrap_or_default();
            return Err(QuizError::TimeLimitExceeded { limit_minutes });
        }

        let grade = grade(&self.questions, &self.answers, self.quiz.passing_score);
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            quiz_id: self.quiz.id.clone(),
            answers: self.answers.clone(),
            correct_count: grade.correct_count,
            total_questions: grade.total_questions,
            score: grade.score,
            passed: grade.passed,
            time_taken_seconds,
            completed_at: now,
        };

        Ok(QuizResult { attempt, grade, exceeded_time_limit })
    }

    /// Move to `Submitted` once the attempt is stored
    pub fn finish(&mut self, result: QuizResult) {
        self.phase = QuizPhase::Submitted(Box::new(result));
    }

    /// Grade and finish in one step, for callers that persist nothing
    pub fn submit(
        &mut self,
        now: DateTime<Utc>,
        enforce_time_limit: bool,
    ) -> Result<QuizResult, QuizError> {
        let result = self.grade_submission(now, enforce_time_limit)?;
        self.finish(result.clone());
        Ok(result)
    }

    fn require_in_progress(&self) -> Result<(), QuizError> {
        match self.phase {
            QuizPhase::InProgress => Ok(()),
            _ => Err(QuizError::NotInProgress),
        }
    }

    fn require_answered(&self, index: usize) -> Result<(), QuizError> {
        let question = &self.questions[index];
        if self.answers.contains_key(&question.id) {
            Ok(())
        } else {
            Err(QuizError::Unanswered { question_id: question.id.clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::quiz::question;

    fn session(time_limit_minutes: Option<u32>) -> QuizSession {
        let quiz = ModuleQuiz {
            id: "quiz-1".into(),
            course_slug: "course-x".into(),
            module_number: 1,
            passing_score: 70,
            time_limit_minutes,
        };
        let questions = vec![
            question("q1", &["a", "b", "c"], "a", 1),
            question("q2", &["a", "b", "c"], "c", 2),
        ];
        QuizSession::new("u1", quiz, questions).unwrap()
    }

    #[test]
    fn quiz_without_questions_cannot_start() {
        let quiz = session(None).quiz().clone();
        assert_eq!(QuizSession::new("u1", quiz, vec![]).unwrap_err(), QuizError::NoQuestions);
    }

    #[test]
    fn answers_require_started_session() {
        let mut s = session(None);
        assert_eq!(s.answer("q1", "a"), Err(QuizError::NotInProgress));
        assert!(s.current_question().is_none());
    }

    #[test]
    fn answer_must_be_one_of_the_options() {
        let mut s = session(None);
        s.start(Utc::now());
        assert!(matches!(s.answer("q1", "z"), Err(QuizError::UnknownOption { .. })));
        assert!(matches!(s.answer("q9", "a"), Err(QuizError::UnknownQuestion(_))));
    }

    #[test]
    fn navigation_requires_answer_to_move_forward() {
        let mut s = session(None);
        s.start(Utc::now());
        assert!(matches!(s.next(), Err(QuizError::Unanswered { .. })));

        s.answer_current("b").unwrap();
        assert_eq!(s.next().unwrap(), 1);
        assert_eq!(s.current_question().unwrap().id, "q2");
        assert_eq!(s.previous().unwrap(), 0);
        assert_eq!(s.answer_for("q1"), Some("b"));

        // Overwrite on change
        s.answer_current("a").unwrap();
        assert_eq!(s.answer_for("q1"), Some("a"));
        assert_eq!(s.answered_count(), 1);
    }

    #[test]
    fn go_to_cannot_skip_unanswered_questions() {
        let mut s = session(None);
        s.start(Utc::now());
        assert!(matches!(s.go_to(1), Err(QuizError::Unanswered { .. })));
        s.answer("q1", "a").unwrap();
        assert_eq!(s.go_to(1).unwrap(), 1);
        assert_eq!(s.go_to(0).unwrap(), 0);
        assert!(matches!(s.go_to(5), Err(QuizError::UnknownQuestion(_))));
    }

    #[test]
    fn submit_requires_every_answer() {
        let mut s = session(None);
        s.start(Utc::now());
        s.answer("q1", "a").unwrap();
        assert_eq!(s.submit(Utc::now(), false), Err(QuizError::Incomplete { missing: 1 }));
        assert_eq!(s.phase(), &QuizPhase::InProgress);
    }

    #[test]
    fn submit_grades_and_records_time() {
        let start = Utc::now();
        let mut s = session(None);
        s.start(start);
        s.answer("q1", "a").unwrap();
        s.answer("q2", "a").unwrap();

        let result = s.submit(start + Duration::seconds(42), false).unwrap();
        assert_eq!(result.attempt.score, 50);
        assert!(!result.attempt.passed);
        assert_eq!(result.attempt.time_taken_seconds, 42);
        assert_eq!(result.attempt.answers.len(), 2);
        assert!(matches!(s.phase(), QuizPhase::Submitted(_)));
        assert_eq!(s.answer("q1", "a"), Err(QuizError::NotInProgress));
    }

    #[test]
    fn retake_starts_fresh() {
        let start = Utc::now();
        let mut s = session(None);
        s.start(start);
        s.answer("q1", "a").unwrap();
        s.answer("q2", "c").unwrap();
        assert!(s.submit(start, false).unwrap().attempt.passed);

        s.retake(start + Duration::minutes(1));
        assert_eq!(s.phase(), &QuizPhase::InProgress);
        assert_eq!(s.answered_count(), 0);
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn time_limit_is_advisory_unless_enforced() {
        let start = Utc::now();
        let late = start + Duration::minutes(11);
        let mut s = session(Some(10));
        s.start(start);
        s.answer("q1", "a").unwrap();
        s.answer("q2", "c").unwrap();

        assert_eq!(
            s.grade_submission(late, true),
            Err(QuizError::TimeLimitExceeded { limit_minutes: 10 })
        );
        let result = s.grade_submission(late, false).unwrap();
        assert!(result.exceeded_time_limit);
        assert!(result.attempt.passed);
    }
}
