//! Lesson completion tracking

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AuthFailure, ProgressionError, StoreError};
use crate::events::{EventSender, ProgressEvent, publish};
use crate::gate::ModuleGate;
use crate::identity::{EnrollmentService, Viewer};
use crate::model::progress::progress_percentage;
use crate::model::{Lesson, ProgressPatch};
use crate::store::{CatalogStore, ProgressStore};

/// Completed vs total lessons for one learner in one course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CourseProgress {
    pub completed: usize,
    pub total: usize,
}

impl CourseProgress {
    /// Integer percentage, 0 for an empty course
    pub fn percentage(&self) -> u8 {
        progress_percentage(self.completed, self.total)
    }

    /// Every lesson complete (never true for an empty course)
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// Result of a successful toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub lesson_id: String,
    pub course_slug: String,
    /// New completion state
    pub completed: bool,
    /// Course progress after the toggle
    pub progress: CourseProgress,
}

/// Toggles lesson completion and publishes the resulting events
pub struct LessonCompletionTracker {
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    enrollment: Arc<dyn EnrollmentService>,
    gate: ModuleGate,
    events: EventSender,
}

impl LessonCompletionTracker {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        progress: Arc<dyn ProgressStore>,
        enrollment: Arc<dyn EnrollmentService>,
        gate: ModuleGate,
        events: EventSender,
    ) -> Self {
        Self { catalog, progress, enrollment, gate, events }
    }

    /// Check the viewer may track progress on `lesson_id`
    ///
    /// Requires a signed-in user who is enrolled (unless the lesson is a free
    /// preview) and an unlocked module. Returns the lesson and the user id.
    pub async fn authorize<'v>(
        &self,
        viewer: &'v Viewer,
        lesson_id: &str,
    ) -> Result<(Lesson, &'v str), ProgressionError> {
        let user_id = viewer.require_user()?;
        let lesson = self
            .catalog
            .lesson(lesson_id)
            .await?
            .ok_or_else(|| ProgressionError::not_found(format!("lesson {lesson_id}")))?;

        if !lesson.is_free_preview
            && !self.enrollment.is_enrolled(user_id, &lesson.course_slug).await?
        {
            return Err(AuthFailure::NotEnrolled { course_slug: lesson.course_slug }.into());
        }
        self.require_unlocked(Some(user_id), &lesson).await?;
        Ok((lesson, user_id))
    }

    /// Fail with `ModuleLocked` unless the lesson's module is open to the user
    pub async fn require_unlocked(
        &self,
        user_id: Option<&str>,
        lesson: &Lesson,
    ) -> Result<(), ProgressionError> {
        let module_number = lesson.module_number;
        if self.gate.is_module_unlocked(user_id, &lesson.course_slug, module_number).await? {
            return Ok(());
        }
        Err(AuthFailure::ModuleLocked { module_number, previous_module: module_number - 1 }.into())
    }

    /// Flip the completion state of a lesson
    ///
    /// `current_completed` is the state the caller is looking at; the lesson
    /// ends up in the opposite state. Nothing is written if the viewer is
    /// not authorized.
    pub async fn toggle_completion(
        &self,
        viewer: &Viewer,
        lesson_id: &str,
        current_completed: bool,
    ) -> Result<ToggleOutcome, ProgressionError> {
        let (lesson, user_id) = self.authorize(viewer, lesson_id).await?;
        self.set_completion(&lesson, viewer, user_id, !current_completed).await
    }

    /// Mark a lesson complete unless it already is
    ///
    /// Returns `None` when the lesson was already complete.
    pub async fn mark_complete(
        &self,
        viewer: &Viewer,
        lesson_id: &str,
    ) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let (lesson, user_id) = self.authorize(viewer, lesson_id).await?;
        let existing = self.progress.lesson_progress(user_id, &[lesson.id.clone()]).await?;
        if existing.iter().any(|p| p.completed) {
            debug!("Lesson {} already complete for {}", lesson.id, user_id);
            return Ok(None);
        }
        self.set_completion(&lesson, viewer, user_id, true).await.map(Some)
    }

    /// Completed vs total lessons in a course
    pub async fn course_progress(
        &self,
        user_id: &str,
        course_slug: &str,
    ) -> Result<CourseProgress, ProgressionError> {
        let catalog = self.catalog.as_ref();
        let progress = count_course_progress(catalog, self.progress.as_ref(), user_id, course_slug)
            .await?;
        Ok(progress)
    }

    async fn set_completion(
        &self,
        lesson: &Lesson,
        viewer: &Viewer,
        user_id: &str,
        completed: bool,
    ) -> Result<ToggleOutcome, ProgressionError> {
        self.progress
            .upsert_lesson_progress(user_id, &lesson.id, ProgressPatch::Completion { completed })
            .await?;
        info!("Lesson {} marked {} for {}", lesson.id, completed_label(completed), user_id);

        let progress = self.course_progress(user_id, &lesson.course_slug).await?;

        if completed {
            publish(
                &self.events,
                ProgressEvent::LessonCompleted {
                    user_id: user_id.to_string(),
                    course_slug: lesson.course_slug.clone(),
                    lesson_id: lesson.id.clone(),
                },
            );
            if progress.is_complete() {
                info!("Course {} complete for {}", lesson.course_slug, user_id);
                publish(
                    &self.events,
                    ProgressEvent::CourseCompleted {
                        user_id: user_id.to_string(),
                        email: viewer.email().map(str::to_string),
                        course_slug: lesson.course_slug.clone(),
                    },
                );
            }
        } else {
            publish(
                &self.events,
                ProgressEvent::LessonReopened {
                    user_id: user_id.to_string(),
                    course_slug: lesson.course_slug.clone(),
                    lesson_id: lesson.id.clone(),
                },
            );
        }

        Ok(ToggleOutcome {
            lesson_id: lesson.id.clone(),
            course_slug: lesson.course_slug.clone(),
            completed,
            progress,
        })
    }
}

/// Count completed lessons of a course for one learner
pub async fn count_course_progress(
    catalog: &dyn CatalogStore,
    progress: &dyn ProgressStore,
    user_id: &str,
    course_slug: &str,
) -> Result<CourseProgress, StoreError> {
    let ids: Vec<String> = catalog.lessons(course_slug).await?.into_iter().map(|l| l.id).collect();
    let completed = progress
        .lesson_progress(user_id, &ids)
        .await?
        .iter()
        .filter(|p| p.completed && ids.contains(&p.lesson_id))
        .count();
    Ok(CourseProgress { completed, total: ids.len() })
}

fn completed_label(completed: bool) -> &'static str {
    if completed { "complete" } else { "incomplete" }
}
