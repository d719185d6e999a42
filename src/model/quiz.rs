//! Module quizzes, their questions, and learner attempts

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// The quiz closing a module, one per (course, module)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleQuiz {
    /// Quiz identifier
    pub id: String,
    /// Course the quiz belongs to
    pub course_slug: String,
    /// Module the quiz closes
    pub module_number: u32,
    /// Minimum score (0-100) to pass
    pub passing_score: u8,
    /// Advisory time limit shown to the learner
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
}

impl ModuleQuiz {
    /// Check the quiz can be passed at all
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.passing_score > 100 {
            return Err(StoreError::Malformed(format!(
                "quiz {} has passing score {} above 100",
                self.id, self.passing_score
            )));
        }
        Ok(())
    }
}

/// A single-answer multiple choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    pub quiz_id: String,
    pub text: String,
    /// Options in display order
    pub options: Vec<String>,
    /// Literal value of the correct option
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    pub order_number: u32,
}

impl QuizQuestion {
    /// Check the question can be scored
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.options.is_empty() {
            return Err(StoreError::Malformed(format!("question {} has no options", self.id)));
        }
        if !self.has_option(&self.correct_answer) {
            return Err(StoreError::Malformed(format!(
                "question {} has a correct answer that is not one of its options",
                self.id
            )));
        }
        Ok(())
    }

    /// Is `choice` one of this question's options?
    pub fn has_option(&self, choice: &str) -> bool {
        self.options.iter().any(|o| o == choice)
    }
}

/// A question as it comes out of storage, options not yet validated
///
/// Options have been stored both as a JSON array and as a string holding
/// an encoded JSON array; both are accepted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuizQuestion {
    pub id: String,
    pub quiz_id: String,
    pub text: String,
    pub options: serde_json::Value,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    pub order_number: u32,
}

impl TryFrom<RawQuizQuestion> for QuizQuestion {
    type Error = StoreError;

    fn try_from(raw: RawQuizQuestion) -> Result<Self, Self::Error> {
        let options = parse_options(&raw.options)
            .ok_or_else(|| StoreError::Malformed(format!("question {} options", raw.id)))?;
        let question = QuizQuestion {
            id: raw.id,
            quiz_id: raw.quiz_id,
            text: raw.text,
            options,
            correct_answer: raw.correct_answer,
            explanation: raw.explanation,
            order_number: raw.order_number,
        };
        question.validate()?;
        Ok(question)
    }
}

impl From<QuizQuestion> for RawQuizQuestion {
    fn from(question: QuizQuestion) -> Self {
        RawQuizQuestion {
            id: question.id,
            quiz_id: question.quiz_id,
            text: question.text,
            options: serde_json::Value::from(question.options),
            correct_answer: question.correct_answer,
            explanation: question.explanation,
            order_number: question.order_number,
        }
    }
}

/// Parse stored options: an array of strings, or a string encoding one
pub fn parse_options(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::Array(items) => {
            items.iter().map(|item| item.as_str().map(str::to_string)).collect()
        }
        serde_json::Value::String(encoded) => {
            let inner: serde_json::Value = serde_json::from_str(encoded).ok()?;
            match inner {
                serde_json::Value::Array(_) => parse_options(&inner),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Validate and order a question list read from storage
pub fn prepare_questions(raw: Vec<RawQuizQuestion>) -> Result<Vec<QuizQuestion>, StoreError> {
    let mut questions =
        raw.into_iter().map(QuizQuestion::try_from).collect::<Result<Vec<_>, _>>()?;
    questions.sort_by_key(|q| q.order_number);
    Ok(questions)
}

/// One graded submission; attempts are append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_id: String,
    pub quiz_id: String,
    /// Question id -> chosen option
    pub answers: BTreeMap<String, String>,
    pub correct_count: u32,
    pub total_questions: u32,
    /// Integer percentage of correct answers
    pub score: u8,
    pub passed: bool,
    pub time_taken_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

/// Pick the most recent attempt; ties keep the later entry
pub fn latest_attempt<'a, I>(attempts: I) -> Option<&'a QuizAttempt>
where
    I: IntoIterator<Item = &'a QuizAttempt>,
{
    attempts.into_iter().fold(None, |latest, attempt| match latest {
        Some(current) if current.completed_at > attempt.completed_at => Some(current),
        _ => Some(attempt),
    })
}

#[cfg(test)]
pub(crate) fn question(id: &str, options: &[&str], correct: &str, order: u32) -> QuizQuestion {
    QuizQuestion {
        id: id.to_string(),
        quiz_id: "quiz-1".to_string(),
        text: format!("Question {id}?"),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_answer: correct.to_string(),
        explanation: format!("Because {correct}"),
        order_number: order,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_options_accepts_array() {
        let options = parse_options(&json!(["a", "b"])).unwrap();
        assert_eq!(options, vec!["a", "b"]);
    }

    #[test]
    fn parse_options_accepts_encoded_string() {
        let options = parse_options(&json!("[\"yes\",\"no\"]")).unwrap();
        assert_eq!(options, vec!["yes", "no"]);
    }

    #[test]
    fn parse_options_rejects_other_shapes() {
        assert!(parse_options(&json!({"a": 1})).is_none());
        assert!(parse_options(&json!([1, 2])).is_none());
        assert!(parse_options(&json!("not json")).is_none());
        assert!(parse_options(&json!("\"a\"")).is_none());
    }

    #[test]
    fn raw_question_with_foreign_answer_is_malformed() {
        let raw = RawQuizQuestion {
            id: "q1".into(),
            quiz_id: "quiz".into(),
            text: "?".into(),
            options: json!(["a", "b"]),
            correct_answer: "c".into(),
            explanation: String::new(),
            order_number: 1,
        };
        assert!(matches!(QuizQuestion::try_from(raw), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn passing_score_above_hundred_is_malformed() {
        let mut quiz = ModuleQuiz {
            id: "quiz".into(),
            course_slug: "x".into(),
            module_number: 1,
            passing_score: 100,
            time_limit_minutes: None,
        };
        assert!(quiz.validate().is_ok());
        quiz.passing_score = 150;
        assert!(matches!(quiz.validate(), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn prepare_questions_orders_by_order_number() {
        let raw = vec![
            RawQuizQuestion::from(question("q2", &["a"], "a", 2)),
            RawQuizQuestion::from(question("q1", &["a"], "a", 1)),
        ];
        let questions = prepare_questions(raw).unwrap();
        assert_eq!(questions[0].id, "q1");
        assert_eq!(questions[1].id, "q2");
    }

    #[test]
    fn latest_attempt_picks_most_recent() {
        let now = Utc::now();
        let attempt = |minutes: i64, passed: bool| QuizAttempt {
            id: Uuid::new_v4(),
            user_id: "u".into(),
            quiz_id: "q".into(),
            answers: BTreeMap::new(),
            correct_count: 0,
            total_questions: 1,
            score: 0,
            passed,
            time_taken_seconds: 1,
            completed_at: now + Duration::minutes(minutes),
        };
        let attempts = vec![attempt(2, true), attempt(5, false), attempt(1, true)];
        let latest = latest_attempt(&attempts).unwrap();
        assert!(!latest.passed);
        assert!(latest_attempt(Vec::<QuizAttempt>::new().iter()).is_none());
    }
}
