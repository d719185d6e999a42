//! Course progression orchestrator
//!
//! Wires the trackers, the quiz engine, the module gate and the certificate
//! issuer to one set of stores, and assembles the course view a learner
//! sees: modules in order, each lesson with its access state and progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::certificate::{CertificateIssuer, IssueReport};
use crate::config::Config;
use crate::error::ProgressionError;
use crate::events::{self, EventSender, ProgressEvent};
use crate::gate::{ModuleGate, usable_quiz};
use crate::identity::{
    CertificateNumberGenerator, EnrollmentService, ProfileService, UuidCertificateNumbers, Viewer,
};
use crate::model::lesson::{group_by_module, title_from_slug};
use crate::model::{Certificate, Lesson, LessonProgress, ModuleQuiz, QuizAttempt};
use crate::quiz::{QuizEngine, QuizOverview, QuizResult, QuizSession};
use crate::store::{CatalogStore, CertificateStore, ProgressStore, QuizStore, Tables};
use crate::tracker::{
    CourseProgress, LessonCompletionTracker, ToggleOutcome, VideoPlayer, VideoWatchTracker,
};

/// Whether a lesson can be opened, and if not, why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonAccess {
    /// Enrolled and the module is unlocked
    Open,
    /// Not enrolled, but the lesson is a free preview
    FreePreview,
    /// The previous module's quiz has not been passed
    ModuleLocked { previous_module: u32 },
    /// Signed in but not enrolled
    RequiresEnrollment,
    /// Anonymous visitor on a paid lesson
    RequiresSignIn,
}

impl LessonAccess {
    pub fn is_accessible(&self) -> bool {
        matches!(self, LessonAccess::Open | LessonAccess::FreePreview)
    }
}

/// Access to one lesson, given the module state and the viewer
pub fn lesson_access(
    lesson: &Lesson,
    module_unlocked: bool,
    signed_in: bool,
    enrolled: bool,
) -> LessonAccess {
    if !module_unlocked {
        LessonAccess::ModuleLocked { previous_module: lesson.module_number.saturating_sub(1) }
    } else if enrolled {
        LessonAccess::Open
    } else if lesson.is_free_preview {
        LessonAccess::FreePreview
    } else if signed_in {
        LessonAccess::RequiresEnrollment
    } else {
        LessonAccess::RequiresSignIn
    }
}

/// A lesson as listed in the course view
#[derive(Debug, Clone, PartialEq)]
pub struct LessonView {
    pub lesson: Lesson,
    pub completed: bool,
    pub video_watched_percentage: u8,
    pub access: LessonAccess,
}

/// A module group in the course view
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleView {
    pub module_number: u32,
    pub unlocked: bool,
    /// Quiz closing this module, if one is configured
    pub quiz: Option<ModuleQuiz>,
    /// Learner's most recent attempt at that quiz
    pub last_attempt: Option<QuizAttempt>,
    /// Lessons in lesson-number order
    pub lessons: Vec<LessonView>,
}

/// Everything needed to render a course for one viewer
#[derive(Debug, Clone, PartialEq)]
pub struct CourseView {
    pub course_slug: String,
    pub title: String,
    pub enrolled: bool,
    /// Modules in ascending module-number order
    pub modules: Vec<ModuleView>,
    pub progress: CourseProgress,
    pub certificate: Option<Certificate>,
    /// First accessible lesson that is not complete
    pub next_lesson: Option<String>,
}

impl CourseView {
    /// Look up a lesson by id
    pub fn lesson(&self, lesson_id: &str) -> Option<&LessonView> {
        self.modules.iter().flat_map(|m| &m.lessons).find(|l| l.lesson.id == lesson_id)
    }

    /// Look up a module by number
    pub fn module(&self, module_number: u32) -> Option<&ModuleView> {
        self.modules.iter().find(|m| m.module_number == module_number)
    }
}

/// External services the engine runs against
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn CatalogStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub quizzes: Arc<dyn QuizStore>,
    pub certificates: Arc<dyn CertificateStore>,
    pub enrollment: Arc<dyn EnrollmentService>,
    pub profiles: Arc<dyn ProfileService>,
    pub numbers: Arc<dyn CertificateNumberGenerator>,
}

impl Services {
    /// Every service backed by one store, with UUID certificate numbers
    pub fn from_store<S: Tables + 'static>(store: Arc<S>) -> Self {
        Self {
            catalog: store.clone(),
            progress: store.clone(),
            quizzes: store.clone(),
            certificates: store.clone(),
            enrollment: store.clone(),
            profiles: store,
            numbers: Arc::new(UuidCertificateNumbers),
        }
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    /// Until handed out by `certificate_reports`
    reports: Option<mpsc::Receiver<IssueReport>>,
}

/// Entry point for everything a learner does in a course
pub struct CourseProgression {
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    quizzes: Arc<dyn QuizStore>,
    enrollment: Arc<dyn EnrollmentService>,
    gate: ModuleGate,
    lessons: Arc<LessonCompletionTracker>,
    video: VideoWatchTracker,
    quiz: QuizEngine,
    issuer: Arc<CertificateIssuer>,
    events: EventSender,
    listener: Mutex<Option<Listener>>,
}

impl CourseProgression {
    pub fn new(services: Services, config: &Config) -> Self {
        let events = events::channel(config.event_buffer);
        let gate = ModuleGate::new(Arc::clone(&services.quizzes));

        let lessons = Arc::new(LessonCompletionTracker::new(
            Arc::clone(&services.catalog),
            Arc::clone(&services.progress),
            Arc::clone(&services.enrollment),
            gate.clone(),
            events.clone(),
        ));
        let video = VideoWatchTracker::new(
            Arc::clone(&services.catalog),
            Arc::clone(&services.progress),
            Arc::clone(&lessons),
            config.flush_interval(),
            config.completion_threshold(),
        );
        let quiz = QuizEngine::new(
            Arc::clone(&services.quizzes),
            Arc::clone(&services.enrollment),
            events.clone(),
            config.enforce_quiz_time_limit,
        );
        let issuer = Arc::new(CertificateIssuer::new(
            services.certificates,
            Arc::clone(&services.catalog),
            Arc::clone(&services.progress),
            services.profiles,
            services.numbers,
        ));

        Self {
            gate,
            catalog: services.catalog,
            progress: services.progress,
            quizzes: services.quizzes,
            enrollment: services.enrollment,
            lessons,
            video,
            quiz,
            issuer,
            events,
            listener: Mutex::new(None),
        }
    }

    /// Build on a single store
    pub fn from_store<S: Tables + 'static>(store: Arc<S>, config: &Config) -> Self {
        Self::new(Services::from_store(store), config)
    }

    /// Receive progress events as they are published
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Outcomes of background certificate issuance
    ///
    /// The certificate listener starts on the first toggle or video open, or
    /// here, whichever comes first. A second call restarts the listener so
    /// the new receiver gets every later report. Must be called from within a
    /// tokio runtime.
    pub fn certificate_reports(&self) -> mpsc::Receiver<IssueReport> {
        let mut listener = self.listener.lock().unwrap_or_else(|p| p.into_inner());
        let reports = listener
            .as_mut()
            .filter(|l| !l.handle.is_finished())
            .and_then(|l| l.reports.take());
        if let Some(reports) = reports {
            return reports;
        }

        let (fresh, reports) = self.spawn_listener();
        if let Some(previous) = listener.replace(fresh) {
            previous.cancel.cancel();
        }
        reports
    }

    /// Make sure `CourseCompleted` events reach the certificate issuer
    fn ensure_listener(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|p| p.into_inner());
        if listener.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return;
        }
        let (mut fresh, reports) = self.spawn_listener();
        fresh.reports = Some(reports);
        *listener = Some(fresh);
    }

    fn spawn_listener(&self) -> (Listener, mpsc::Receiver<IssueReport>) {
        let cancel = CancellationToken::new();
        let (handle, reports) =
            Arc::clone(&self.issuer).spawn_listener(self.events.subscribe(), cancel.clone());
        (Listener { cancel, handle, reports: None }, reports)
    }

    /// Stop the certificate listener and wait for it to finish
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
            if let Err(e) = listener.handle.await {
                warn!("Certificate listener ended abnormally: {}", e);
            }
        }
    }

    /// Assemble the course as `viewer` sees it
    ///
    /// Module access is recomputed from the latest attempts on every call.
    pub async fn load_course(
        &self,
        viewer: &Viewer,
        course_slug: &str,
    ) -> Result<CourseView, ProgressionError> {
        let lessons = self.catalog.lessons(course_slug).await?;
        let catalog_title = self.catalog.course_title(course_slug).await?;
        if lessons.is_empty() && catalog_title.is_none() {
            return Err(ProgressionError::not_found(format!("course {course_slug}")));
        }
        let title = catalog_title.unwrap_or_else(|| title_from_slug(course_slug));

        let user_id = viewer.user_id();
        let enrolled = match user_id {
            Some(user_id) => self.enrollment.is_enrolled(user_id, course_slug).await?,
            None => false,
        };

        let rows: HashMap<String, LessonProgress> = match user_id {
            Some(user_id) => {
                let ids: Vec<String> = lessons.iter().map(|l| l.id.clone()).collect();
                self.progress
                    .lesson_progress(user_id, &ids)
                    .await?
                    .into_iter()
                    .map(|p| (p.lesson_id.clone(), p))
                    .collect()
            }
            None => HashMap::new(),
        };

        let mut modules = Vec::new();
        for (module_number, group) in group_by_module(&lessons) {
            let unlocked = self.gate.is_module_unlocked(user_id, course_slug, module_number).await?;
            let quiz = usable_quiz(self.quizzes.as_ref(), course_slug, module_number).await?;
            let last_attempt = match (user_id, &quiz) {
                (Some(user_id), Some(quiz)) => self.quizzes.latest_attempt(user_id, &quiz.id).await?,
                _ => None,
            };

            let lessons = group
                .into_iter()
                .map(|lesson| {
                    let row = rows.get(&lesson.id);
                    LessonView {
                        access: lesson_access(lesson, unlocked, user_id.is_some(), enrolled),
                        completed: row.is_some_and(|p| p.completed),
                        video_watched_percentage: row.map_or(0, |p| p.video_watched_percentage),
                        lesson: lesson.clone(),
                    }
                })
                .collect();

            modules.push(ModuleView { module_number, unlocked, quiz, last_attempt, lessons });
        }

        let completed = modules.iter().flat_map(|m| &m.lessons).filter(|l| l.completed).count();
        let progress = CourseProgress { completed, total: lessons.len() };

        let next_lesson = modules
            .iter()
            .flat_map(|m| &m.lessons)
            .find(|l| l.access.is_accessible() && !l.completed)
            .map(|l| l.lesson.id.clone());

        let certificate = match user_id {
            Some(user_id) => self.issuer.certificate(user_id, course_slug).await?,
            None => None,
        };

        debug!(
            "Loaded {} for {:?}: {} modules, {}%",
            course_slug,
            user_id,
            modules.len(),
            progress.percentage()
        );

        Ok(CourseView {
            course_slug: course_slug.to_string(),
            title,
            enrolled,
            modules,
            progress,
            certificate,
            next_lesson,
        })
    }

    /// Flip a lesson's completion state
    ///
    /// Fails without writing unless the viewer is signed in, enrolled (or the
    /// lesson is a free preview), and the lesson's module is unlocked.
    /// Completing the last lesson issues the certificate in the background.
    pub async fn toggle_lesson(
        &self,
        viewer: &Viewer,
        lesson_id: &str,
        current_completed: bool,
    ) -> Result<ToggleOutcome, ProgressionError> {
        self.ensure_listener();
        self.lessons.toggle_completion(viewer, lesson_id, current_completed).await
    }

    /// Open a lesson video, seeking to the saved position
    pub async fn open_video(
        &self,
        viewer: &Viewer,
        lesson_id: &str,
    ) -> Result<VideoPlayer, ProgressionError> {
        self.ensure_listener();
        self.video.open(viewer, lesson_id).await
    }

    /// Quiz start screen for a module
    pub async fn quiz_overview(
        &self,
        viewer: &Viewer,
        course_slug: &str,
        module_number: u32,
    ) -> Result<QuizOverview, ProgressionError> {
        self.quiz.overview(viewer, course_slug, module_number).await
    }

    /// Start (or retake) a module quiz
    pub async fn start_quiz(
        &self,
        viewer: &Viewer,
        course_slug: &str,
        module_number: u32,
    ) -> Result<QuizSession, ProgressionError> {
        self.quiz.start(viewer, course_slug, module_number, Utc::now()).await
    }

    /// Grade and store a quiz session
    pub async fn submit_quiz(
        &self,
        session: &mut QuizSession,
    ) -> Result<QuizResult, ProgressionError> {
        self.quiz.submit(session, Utc::now()).await
    }

    /// The viewer's certificate for a course, if issued
    pub async fn certificate(
        &self,
        viewer: &Viewer,
        course_slug: &str,
    ) -> Result<Option<Certificate>, ProgressionError> {
        let user_id = viewer.require_user()?;
        self.issuer.certificate(user_id, course_slug).await
    }

    /// Completed vs total lessons for the viewer
    pub async fn course_progress(
        &self,
        viewer: &Viewer,
        course_slug: &str,
    ) -> Result<CourseProgress, ProgressionError> {
        let user_id = viewer.require_user()?;
        self.lessons.course_progress(user_id, course_slug).await
    }
}

impl Drop for CourseProgression {
    fn drop(&mut self) {
        let listener = self.listener.get_mut().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(listener) = listener {
            listener.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast::error::TryRecvError;
    use uuid::Uuid;

    use super::*;
    use crate::certificate::IssueOutcome;
    use crate::error::{AuthFailure, StoreError};
    use crate::model::lesson::lesson;
    use crate::model::ProgressPatch;
    use crate::store::{CatalogImport, Course, MemoryStore};

    fn quiz(module: u32) -> ModuleQuiz {
        ModuleQuiz {
            id: format!("quiz-{module}"),
            course_slug: "course-x".into(),
            module_number: module,
            passing_score: 70,
            time_limit_minutes: None,
        }
    }

    fn store() -> Arc<MemoryStore> {
        let mut preview = lesson("l1", 1, 1);
        preview.is_free_preview = true;
        Arc::new(MemoryStore::with_catalog(CatalogImport {
            courses: vec![Course { slug: "course-x".into(), title: "Course X".into() }],
            // Out of order on purpose
            lessons: vec![lesson("l3", 2, 1), lesson("l2", 1, 2), preview],
            quizzes: vec![quiz(1)],
            ..Default::default()
        }))
    }

    fn progression(store: Arc<MemoryStore>) -> CourseProgression {
        CourseProgression::from_store(store, &Config::default())
    }

    fn learner() -> Viewer {
        Viewer::signed_in("u1", "u1@example.com")
    }

    async fn record_attempt(store: &MemoryStore, passed: bool) {
        store
            .insert_attempt(QuizAttempt {
                id: Uuid::new_v4(),
                user_id: "u1".into(),
                quiz_id: "quiz-1".into(),
                answers: BTreeMap::new(),
                correct_count: u32::from(passed),
                total_questions: 1,
                score: if passed { 100 } else { 0 },
                passed,
                time_taken_seconds: 10,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn access_reasons_follow_gate_then_enrollment() {
        let mut l = lesson("l1", 2, 1);
        assert_eq!(
            lesson_access(&l, false, true, true),
            LessonAccess::ModuleLocked { previous_module: 1 }
        );
        assert_eq!(lesson_access(&l, true, true, true), LessonAccess::Open);
        assert_eq!(lesson_access(&l, true, true, false), LessonAccess::RequiresEnrollment);
        assert_eq!(lesson_access(&l, true, false, false), LessonAccess::RequiresSignIn);
        l.is_free_preview = true;
        assert_eq!(lesson_access(&l, true, false, false), LessonAccess::FreePreview);
    }

    #[tokio::test]
    async fn anonymous_view_shows_free_preview_only() {
        let view = progression(store()).load_course(&Viewer::Anonymous, "course-x").await.unwrap();

        assert_eq!(view.title, "Course X");
        assert!(!view.enrolled);
        let order: Vec<(u32, Vec<&str>)> = view
            .modules
            .iter()
            .map(|m| (m.module_number, m.lessons.iter().map(|l| l.lesson.id.as_str()).collect()))
            .collect();
        assert_eq!(order, vec![(1, vec!["l1", "l2"]), (2, vec!["l3"])]);

        assert_eq!(view.lesson("l1").unwrap().access, LessonAccess::FreePreview);
        assert_eq!(view.lesson("l2").unwrap().access, LessonAccess::RequiresSignIn);
        assert!(!view.module(2).unwrap().unlocked);
        assert_eq!(view.next_lesson.as_deref(), Some("l1"));
        assert_eq!(view.progress.percentage(), 0);
    }

    #[tokio::test]
    async fn anonymous_toggle_fails_without_writing() {
        let store = store();
        let err = progression(store.clone())
            .toggle_lesson(&Viewer::Anonymous, "l1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::NotAuthorized(AuthFailure::NotSignedIn)));
        assert!(store.snapshot().progress.is_empty());
    }

    #[tokio::test]
    async fn locked_module_lessons_cannot_be_toggled() {
        let store = store();
        store.enroll("u1", "course-x");
        let engine = progression(store.clone());

        let err = engine.toggle_lesson(&learner(), "l3", false).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::NotAuthorized(AuthFailure::ModuleLocked { module_number: 2, .. })
        ));
        assert!(store.snapshot().progress.is_empty());

        record_attempt(&store, true).await;
        assert!(engine.toggle_lesson(&learner(), "l3", false).await.unwrap().completed);
    }

    #[tokio::test]
    async fn gate_is_recomputed_on_every_load() {
        let store = store();
        store.enroll("u1", "course-x");
        let engine = progression(store.clone());

        let view = engine.load_course(&learner(), "course-x").await.unwrap();
        assert_eq!(
            view.lesson("l3").unwrap().access,
            LessonAccess::ModuleLocked { previous_module: 1 }
        );

        record_attempt(&store, true).await;
        let view = engine.load_course(&learner(), "course-x").await.unwrap();
        assert_eq!(view.lesson("l3").unwrap().access, LessonAccess::Open);
        assert!(view.module(1).unwrap().last_attempt.as_ref().unwrap().passed);

        record_attempt(&store, false).await;
        let view = engine.load_course(&learner(), "course-x").await.unwrap();
        assert!(!view.module(2).unwrap().unlocked);
    }

    #[tokio::test]
    async fn view_reports_progress_and_next_lesson() {
        let store = store();
        store.enroll("u1", "course-x");
        store
            .upsert_lesson_progress("u1", "l2", ProgressPatch::video(30.0, 60.0))
            .await
            .unwrap();
        let engine = progression(store);

        engine.toggle_lesson(&learner(), "l1", false).await.unwrap();
        let view = engine.load_course(&learner(), "course-x").await.unwrap();
        assert!(view.enrolled);
        assert_eq!(view.progress, CourseProgress { completed: 1, total: 3 });
        assert_eq!(view.progress.percentage(), 33);
        assert_eq!(view.lesson("l2").unwrap().video_watched_percentage, 50);
        assert_eq!(view.next_lesson.as_deref(), Some("l2"));
    }

    #[tokio::test]
    async fn unknown_course_is_not_found() {
        let err = progression(store()).load_course(&learner(), "nope").await.unwrap_err();
        assert!(err.is_silent());
    }

    #[tokio::test]
    async fn video_in_locked_module_does_not_open() {
        let store = store();
        store.enroll("u1", "course-x");
        let err = progression(store).open_video(&learner(), "l3").await.unwrap_err();
        assert!(matches!(err, ProgressionError::NotAuthorized(AuthFailure::ModuleLocked { .. })));
    }

    #[tokio::test]
    async fn listener_issues_certificate_after_last_lesson() {
        let store = store();
        store.enroll("u1", "course-x");
        record_attempt(&store, true).await;
        let engine = progression(store.clone());
        let mut reports = engine.certificate_reports();

        for id in ["l1", "l2"] {
            engine.toggle_lesson(&learner(), id, false).await.unwrap();
        }
        let outcome = engine.toggle_lesson(&learner(), "l3", false).await.unwrap();
        assert!(outcome.progress.is_complete());

        let report = reports.recv().await.unwrap();
        assert!(matches!(report.result, Ok(IssueOutcome::Issued(_))));

        // Re-toggling the last lesson re-triggers the check, which is a no-op
        engine.toggle_lesson(&learner(), "l3", true).await.unwrap();
        engine.toggle_lesson(&learner(), "l3", false).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert!(matches!(report.result, Ok(IssueOutcome::AlreadyIssued)));

        engine.shutdown().await;
        assert_eq!(store.snapshot().certificates.len(), 1);
        let view = engine.load_course(&learner(), "course-x").await.unwrap();
        assert_eq!(view.certificate.unwrap().user_name, "u1@example.com");
    }

    #[tokio::test]
    async fn last_lesson_issues_certificate_without_reading_reports() {
        let store = store();
        store.enroll("u1", "course-x");
        record_attempt(&store, true).await;
        let engine = progression(store.clone());

        for id in ["l1", "l2", "l3"] {
            engine.toggle_lesson(&learner(), id, false).await.unwrap();
        }
        let issued = tokio::time::timeout(Duration::from_secs(5), async {
            while store.snapshot().certificates.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(issued.is_ok(), "certificate was never issued");
        assert_eq!(store.snapshot().certificates.len(), 1);
    }

    /// Progress store whose completion writes fail while offline
    struct FlakyCompletion {
        inner: Arc<MemoryStore>,
        offline: AtomicBool,
    }

    #[async_trait]
    impl ProgressStore for FlakyCompletion {
        async fn lesson_progress(
            &self,
            user_id: &str,
            lesson_ids: &[String],
        ) -> Result<Vec<LessonProgress>, StoreError> {
            self.inner.lesson_progress(user_id, lesson_ids).await
        }

        async fn upsert_lesson_progress(
            &self,
            user_id: &str,
            lesson_id: &str,
            patch: ProgressPatch,
        ) -> Result<LessonProgress, StoreError> {
            if matches!(patch, ProgressPatch::Completion { .. })
                && self.offline.load(Ordering::SeqCst)
            {
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.inner.upsert_lesson_progress(user_id, lesson_id, patch).await
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn failed_completion_write_is_reported_and_retryable() {
        let store = store();
        store.enroll("u1", "course-x");
        record_attempt(&store, true).await;
        let flaky =
            Arc::new(FlakyCompletion { inner: store.clone(), offline: AtomicBool::new(false) });
        let mut services = Services::from_store(store.clone());
        services.progress = flaky.clone();
        let engine = CourseProgression::new(services, &Config::default());
        let mut events = engine.subscribe();

        for id in ["l1", "l2"] {
            engine.toggle_lesson(&learner(), id, false).await.unwrap();
        }
        drain(&mut events);

        flaky.offline.store(true, Ordering::SeqCst);
        let err = engine.toggle_lesson(&learner(), "l3", false).await.unwrap_err();
        assert!(matches!(err, ProgressionError::TransientStore(_)));
        assert!(err.is_recoverable());
        assert!(drain(&mut events).is_empty());
        assert!(store.snapshot().progress.iter().all(|p| p.lesson_id != "l3"));

        flaky.offline.store(false, Ordering::SeqCst);
        let outcome = engine.toggle_lesson(&learner(), "l3", false).await.unwrap();
        assert!(outcome.progress.is_complete());
        let events = drain(&mut events);
        assert!(matches!(events[0], ProgressEvent::LessonCompleted { .. }));
        assert!(matches!(events[1], ProgressEvent::CourseCompleted { .. }));
    }

    /// Certificate store that is always down
    struct OfflineCertificates;

    #[async_trait]
    impl CertificateStore for OfflineCertificates {
        async fn certificate(&self, _: &str, _: &str) -> Result<Option<Certificate>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn insert_certificate(&self, _: Certificate) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn issuer_failure_keeps_lesson_completed() {
        let store = store();
        store.enroll("u1", "course-x");
        record_attempt(&store, true).await;
        let mut services = Services::from_store(store.clone());
        services.certificates = Arc::new(OfflineCertificates);
        let engine = CourseProgression::new(services, &Config::default());
        let mut reports = engine.certificate_reports();

        for id in ["l1", "l2", "l3"] {
            engine.toggle_lesson(&learner(), id, false).await.unwrap();
        }
        let report = reports.recv().await.unwrap();
        assert!(report.result.is_err());

        let rows = store.snapshot().progress;
        assert!(rows.iter().any(|p| p.lesson_id == "l3" && p.completed));
        let progress = engine.course_progress(&learner(), "course-x").await.unwrap();
        assert!(progress.is_complete());
    }
}
