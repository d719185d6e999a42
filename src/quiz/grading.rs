//! Scoring of quiz answers
//!
//! Score and pass/fail are always derived from the answers here; they are
//! never taken from anywhere else.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::QuizQuestion;

/// Per-question result shown on the results screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub text: String,
    /// What the learner picked (empty if unanswered)
    pub chosen: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: String,
}

/// Graded answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub correct_count: u32,
    pub total_questions: u32,
    /// Integer percentage, rounded half away from zero
    pub score: u8,
    pub passed: bool,
    pub questions: Vec<QuestionOutcome>,
}

/// `round(100 * correct / total)`, 0 when there are no questions
pub fn score(correct_count: u32, total_questions: u32) -> u8 {
    if total_questions == 0 {
        return 0;
    }
    let correct = correct_count.min(total_questions);
    (f64::from(correct) * 100.0 / f64::from(total_questions)).round() as u8
}

/// A score passes when it reaches the passing score
pub fn passes(score: u8, passing_score: u8) -> bool {
    score >= passing_score
}

/// Grade `answers` by exact string match against each correct answer
pub fn grade(
    questions: &[QuizQuestion],
    answers: &BTreeMap<String, String>,
    passing_score: u8,
) -> Grade {
    let outcomes: Vec<QuestionOutcome> = questions
        .iter()
        .map(|q| {
            let chosen = answers.get(&q.id).cloned().unwrap_or_default();
            QuestionOutcome {
                question_id: q.id.clone(),
                text: q.text.clone(),
                is_correct: chosen == q.correct_answer,
                chosen,
                correct_answer: q.correct_answer.clone(),
                explanation: q.explanation.clone(),
            }
        })
        .collect();

    let correct_count = outcomes.iter().filter(|o| o.is_correct).count() as u32;
    let total_questions = outcomes.len() as u32;
    let score = score(correct_count, total_questions);

    Grade {
        correct_count,
        total_questions,
        score,
        passed: passes(score, passing_score),
        questions: outcomes,
    }
}
