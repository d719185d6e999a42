//! In-process table set shared by the memory and JSON stores
//!
//! Every method here is synchronous and runs under the owning store's lock,
//! which is what makes upserts and certificate inserts atomic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::lesson::sort_lessons;
use crate::model::quiz::{latest_attempt, prepare_questions};
use crate::model::{
    Certificate, Lesson, LessonProgress, ModuleQuiz, ProgressPatch, QuizAttempt, QuizQuestion,
    RawQuizQuestion,
};

/// A course entry in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// URL slug, unique
    pub slug: String,
    /// Display title
    pub title: String,
}

/// A learner's enrollment in a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub user_id: String,
    pub course_slug: String,
}

/// Authored course content, the shape of a catalog import file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogImport {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub quizzes: Vec<ModuleQuiz>,
    #[serde(default)]
    pub questions: Vec<RawQuizQuestion>,
}

/// All tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub quizzes: Vec<ModuleQuiz>,
    #[serde(default)]
    pub questions: Vec<RawQuizQuestion>,
    #[serde(default)]
    pub progress: Vec<LessonProgress>,
    #[serde(default)]
    pub attempts: Vec<QuizAttempt>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
    /// User id -> display name
    #[serde(default)]
    pub profiles: BTreeMap<String, String>,
}

impl StoreData {
    /// Merge authored content, replacing records with the same key
    pub fn import(&mut self, catalog: CatalogImport) {
        for course in catalog.courses {
            self.courses.retain(|c| c.slug != course.slug);
            self.courses.push(course);
        }
        for lesson in catalog.lessons {
            self.lessons.retain(|l| l.id != lesson.id);
            self.lessons.push(lesson);
        }
        for quiz in catalog.quizzes {
            self.quizzes.retain(|q| {
                q.id != quiz.id
                    && (q.course_slug != quiz.course_slug || q.module_number != quiz.module_number)
            });
            self.quizzes.push(quiz);
        }
        for question in catalog.questions {
            self.questions.retain(|q| q.id != question.id);
            self.questions.push(question);
        }
    }

    pub fn lessons(&self, course_slug: &str) -> Vec<Lesson> {
        let mut lessons: Vec<Lesson> =
            self.lessons.iter().filter(|l| l.course_slug == course_slug).cloned().collect();
        sort_lessons(&mut lessons);
        lessons
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id).cloned()
    }

    pub fn course_title(&self, course_slug: &str) -> Option<String> {
        self.courses.iter().find(|c| c.slug == course_slug).map(|c| c.title.clone())
    }

    pub fn lesson_progress(&self, user_id: &str, lesson_ids: &[String]) -> Vec<LessonProgress> {
        self.progress
            .iter()
            .filter(|p| p.user_id == user_id && lesson_ids.contains(&p.lesson_id))
            .cloned()
            .collect()
    }

    /// Create-if-absent, else update, keyed by (user, lesson)
    pub fn upsert_lesson_progress(
        &mut self,
        user_id: &str,
        lesson_id: &str,
        patch: ProgressPatch,
        now: DateTime<Utc>,
    ) -> LessonProgress {
        let index = match self
            .progress
            .iter()
            .position(|p| p.user_id == user_id && p.lesson_id == lesson_id)
        {
            Some(index) => index,
            None => {
                self.progress.push(LessonProgress::new(user_id, lesson_id, now));
                self.progress.len() - 1
            }
        };
        let row = &mut self.progress[index];
        row.apply(&patch, now);
        row.clone()
    }

    /// The module's quiz, validated
    pub fn quiz(
        &self,
        course_slug: &str,
        module_number: u32,
    ) -> Result<Option<ModuleQuiz>, StoreError> {
        self.quizzes
            .iter()
            .find(|q| q.course_slug == course_slug && q.module_number == module_number)
            .map(|q| q.validate().map(|()| q.clone()))
            .transpose()
    }

    pub fn questions(&self, quiz_id: &str) -> Result<Vec<QuizQuestion>, StoreError> {
        let raw: Vec<RawQuizQuestion> =
            self.questions.iter().filter(|q| q.quiz_id == quiz_id).cloned().collect();
        prepare_questions(raw)
    }

    pub fn latest_attempt(&self, user_id: &str, quiz_id: &str) -> Option<QuizAttempt> {
        latest_attempt(self.attempts.iter().filter(|a| a.user_id == user_id && a.quiz_id == quiz_id))
            .cloned()
    }

    pub fn insert_attempt(&mut self, attempt: QuizAttempt) -> Result<(), StoreError> {
        if self.attempts.iter().any(|a| a.id == attempt.id) {
            return Err(StoreError::UniqueViolation {
                entity: "quiz attempt",
                key: attempt.id.to_string(),
            });
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn certificate(&self, user_id: &str, course_slug: &str) -> Option<Certificate> {
        self.certificates.iter().find(|c| c.key() == (user_id, course_slug)).cloned()
    }

    /// Insert, enforcing one certificate per (user, course) and unique numbers
    pub fn insert_certificate(&mut self, certificate: Certificate) -> Result<(), StoreError> {
        if self.certificates.iter().any(|c| c.key() == certificate.key()) {
            return Err(StoreError::UniqueViolation {
                entity: "certificate",
                key: format!("{}/{}", certificate.user_id, certificate.course_slug),
            });
        }
        if self.certificates.iter().any(|c| c.certificate_number == certificate.certificate_number)
        {
            return Err(StoreError::UniqueViolation {
                entity: "certificate number",
                key: certificate.certificate_number,
            });
        }
        self.certificates.push(certificate);
        Ok(())
    }

    pub fn is_enrolled(&self, user_id: &str, course_slug: &str) -> bool {
        self.enrollments.iter().any(|e| e.user_id == user_id && e.course_slug == course_slug)
    }

    /// Record an enrollment; returns false if it already existed
    pub fn enroll(&mut self, user_id: &str, course_slug: &str) -> bool {
        if self.is_enrolled(user_id, course_slug) {
            return false;
        }
        self.enrollments
            .push(Enrollment { user_id: user_id.to_string(), course_slug: course_slug.to_string() });
        true
    }

    pub fn display_name(&self, user_id: &str) -> Option<String> {
        self.profiles.get(user_id).cloned()
    }
}
