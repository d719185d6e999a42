//! Persistence boundary
//!
//! The engine talks to storage only through the traits below. Two backends
//! are provided: [`MemoryStore`] and the file-backed [`JsonStore`]. Both
//! keep their tables in a [`StoreData`] behind a lock, so each upsert and
//! each certificate insert is a single atomic read-modify-write.

pub mod data;
pub mod json;
pub mod memory;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::identity::{EnrollmentService, ProfileService};
use crate::model::{
    Certificate, Lesson, LessonProgress, ModuleQuiz, ProgressPatch, QuizAttempt, QuizQuestion,
};

// Re-exports
pub use data::{CatalogImport, Course, StoreData};
pub use json::JsonStore;
pub use memory::MemoryStore;

/// Read access to authored course content
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All lessons of a course, ordered by module then lesson number
    async fn lessons(&self, course_slug: &str) -> Result<Vec<Lesson>, StoreError>;

    /// Look up a single lesson
    async fn lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, StoreError>;

    /// Course title, if the course is in the catalog
    async fn course_title(&self, course_slug: &str) -> Result<Option<String>, StoreError>;
}

/// Per-learner lesson progress
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Progress rows that exist for the given lessons
    async fn lesson_progress(
        &self,
        user_id: &str,
        lesson_ids: &[String],
    ) -> Result<Vec<LessonProgress>, StoreError>;

    /// Atomic create-or-update of the (user, lesson) row
    async fn upsert_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        patch: ProgressPatch,
    ) -> Result<LessonProgress, StoreError>;
}

/// Quizzes, questions and attempts
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn quiz(
        &self,
        course_slug: &str,
        module_number: u32,
    ) -> Result<Option<ModuleQuiz>, StoreError>;

    /// Validated questions in display order
    async fn questions(&self, quiz_id: &str) -> Result<Vec<QuizQuestion>, StoreError>;

    /// Most recent attempt by this user, if any
    async fn latest_attempt(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Option<QuizAttempt>, StoreError>;

    /// Append an attempt; attempts are never updated
    async fn insert_attempt(&self, attempt: QuizAttempt) -> Result<(), StoreError>;
}

/// Issued certificates
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn certificate(
        &self,
        user_id: &str,
        course_slug: &str,
    ) -> Result<Option<Certificate>, StoreError>;

    /// Insert; rejects a second certificate for the same (user, course)
    /// with [`StoreError::UniqueViolation`]
    async fn insert_certificate(&self, certificate: Certificate) -> Result<(), StoreError>;
}

/// Lock-guarded access to a [`StoreData`]
///
/// Implementors only decide where the tables live and what happens after a
/// write; the store traits are provided for every implementor.
pub trait Tables: Send + Sync {
    /// Run `f` with shared access
    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R;

    /// Run `f` with exclusive access, then commit
    fn write<R>(&self, f: impl FnOnce(&mut StoreData) -> R) -> Result<R, StoreError>;
}

#[async_trait]
impl<T: Tables> CatalogStore for T {
    async fn lessons(&self, course_slug: &str) -> Result<Vec<Lesson>, StoreError> {
        Ok(self.read(|data| data.lessons(course_slug)))
    }

    async fn lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, StoreError> {
        Ok(self.read(|data| data.lesson(lesson_id)))
    }

    async fn course_title(&self, course_slug: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(|data| data.course_title(course_slug)))
    }
}

#[async_trait]
impl<T: Tables> ProgressStore for T {
    async fn lesson_progress(
        &self,
        user_id: &str,
        lesson_ids: &[String],
    ) -> Result<Vec<LessonProgress>, StoreError> {
        Ok(self.read(|data| data.lesson_progress(user_id, lesson_ids)))
    }

    async fn upsert_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        patch: ProgressPatch,
    ) -> Result<LessonProgress, StoreError> {
        let now = Utc::now();
        self.write(|data| data.upsert_lesson_progress(user_id, lesson_id, patch, now))
    }
}

#[async_trait]
impl<T: Tables> QuizStore for T {
    async fn quiz(
        &self,
        course_slug: &str,
        module_number: u32,
    ) -> Result<Option<ModuleQuiz>, StoreError> {
        self.read(|data| data.quiz(course_slug, module_number))
    }

    async fn questions(&self, quiz_id: &str) -> Result<Vec<QuizQuestion>, StoreError> {
        self.read(|data| data.questions(quiz_id))
    }

    async fn latest_attempt(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<Option<QuizAttempt>, StoreError> {
        Ok(self.read(|data| data.latest_attempt(user_id, quiz_id)))
    }

    async fn insert_attempt(&self, attempt: QuizAttempt) -> Result<(), StoreError> {
        self.write(|data| data.insert_attempt(attempt))?
    }
}

#[async_trait]
impl<T: Tables> CertificateStore for T {
    async fn certificate(
        &self,
        user_id: &str,
        course_slug: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        Ok(self.read(|data| data.certificate(user_id, course_slug)))
    }

    async fn insert_certificate(&self, certificate: Certificate) -> Result<(), StoreError> {
        self.write(|data| data.insert_certificate(certificate))?
    }
}

#[async_trait]
impl<T: Tables> EnrollmentService for T {
    async fn is_enrolled(&self, user_id: &str, course_slug: &str) -> Result<bool, StoreError> {
        Ok(self.read(|data| data.is_enrolled(user_id, course_slug)))
    }
}

#[async_trait]
impl<T: Tables> ProfileService for T {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(|data| data.display_name(user_id)))
    }
}
