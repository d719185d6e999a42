//! End-to-end walk through a two-module course

use std::sync::Arc;

use lessonpath::store::CatalogImport;
use lessonpath::{
    AuthFailure, Config, CourseProgression, IssueOutcome, LessonAccess, MemoryStore,
    ProgressionError, Viewer,
};
use pretty_assertions::assert_eq;

const CATALOG: &str = r#"{
    "courses": [{ "slug": "course-x", "title": "Course X" }],
    "lessons": [
        { "id": "intro", "courseSlug": "course-x", "moduleNumber": 1, "lessonNumber": 1,
          "title": "Introduction", "isFreePreview": true,
          "videoRef": "intro.mp4", "videoDurationSeconds": 120 },
        { "id": "basics", "courseSlug": "course-x", "moduleNumber": 1, "lessonNumber": 2,
          "title": "Basics" },
        { "id": "advanced", "courseSlug": "course-x", "moduleNumber": 2, "lessonNumber": 1,
          "title": "Advanced" }
    ],
    "quizzes": [
        { "id": "quiz1", "courseSlug": "course-x", "moduleNumber": 1, "passingScore": 70 }
    ],
    "questions": [
        { "id": "q1", "quizId": "quiz1", "text": "First?", "options": ["a", "b"],
          "correctAnswer": "a", "orderNumber": 1 },
        { "id": "q2", "quizId": "quiz1", "text": "Second?", "options": "[\"c\", \"d\"]",
          "correctAnswer": "d", "orderNumber": 2 }
    ]
}"#;

fn store() -> Arc<MemoryStore> {
    let catalog: CatalogImport = serde_json::from_str(CATALOG).unwrap();
    Arc::new(MemoryStore::with_catalog(catalog))
}

async fn take_quiz(engine: &CourseProgression, viewer: &Viewer, answers: &[&str]) -> (u8, bool) {
    let mut session = engine.start_quiz(viewer, "course-x", 1).await.unwrap();
    for (i, answer) in answers.iter().enumerate() {
        session.answer_current(answer).unwrap();
        if i + 1 < answers.len() {
            session.next().unwrap();
        }
    }
    let result = engine.submit_quiz(&mut session).await.unwrap();
    (result.attempt.score, result.attempt.passed)
}

#[tokio::test]
async fn learner_progresses_through_course_to_certificate() {
    let store = store();
    let engine = CourseProgression::from_store(Arc::clone(&store), &Config::default());
    let mut reports = engine.certificate_reports();

    // Anonymous visitor can see the free preview but cannot track progress
    let visitor = Viewer::Anonymous;
    let view = engine.load_course(&visitor, "course-x").await.unwrap();
    assert_eq!(view.lesson("intro").unwrap().access, LessonAccess::FreePreview);
    assert!(engine.open_video(&visitor, "intro").await.is_ok());
    let err = engine.toggle_lesson(&visitor, "intro", false).await.unwrap_err();
    assert!(matches!(err, ProgressionError::NotAuthorized(AuthFailure::NotSignedIn)));

    // Sign in and enroll
    let learner = Viewer::signed_in("ada", "ada@example.com");
    store.enroll("ada", "course-x");
    store.set_display_name("ada", "Ada Lovelace");

    // Watching the intro to the end completes it
    let mut player = engine.open_video(&learner, "intro").await.unwrap();
    player.play().await.unwrap();
    let outcome = player.time_update(118.0, 120.0).await.unwrap().unwrap();
    assert!(outcome.completed);
    player.close().await;

    let outcome = engine.toggle_lesson(&learner, "basics", false).await.unwrap();
    assert_eq!(outcome.progress.percentage(), 67);

    // Half right is below the pass mark
    assert_eq!(take_quiz(&engine, &learner, &["a", "c"]).await, (50, false));
    let view = engine.load_course(&learner, "course-x").await.unwrap();
    assert!(!view.module(2).unwrap().unlocked);
    let err = engine.toggle_lesson(&learner, "advanced", false).await.unwrap_err();
    assert!(matches!(err, ProgressionError::NotAuthorized(AuthFailure::ModuleLocked { .. })));

    // The retake passes and module 2 opens on the next load
    let overview = engine.quiz_overview(&learner, "course-x", 1).await.unwrap();
    assert!(overview.retake_offered);
    assert_eq!(take_quiz(&engine, &learner, &["a", "d"]).await, (100, true));
    let view = engine.load_course(&learner, "course-x").await.unwrap();
    assert!(view.module(2).unwrap().unlocked);
    assert_eq!(view.next_lesson.as_deref(), Some("advanced"));

    // Last lesson triggers exactly one certificate
    let outcome = engine.toggle_lesson(&learner, "advanced", false).await.unwrap();
    assert!(outcome.progress.is_complete());
    let report = reports.recv().await.unwrap();
    let Ok(IssueOutcome::Issued(cert)) = report.result else {
        panic!("expected a certificate, got {:?}", report.result);
    };
    assert_eq!(cert.user_name, "Ada Lovelace");
    assert_eq!(cert.course_title, "Course X");

    engine.shutdown().await;
    assert_eq!(store.snapshot().certificates.len(), 1);
    let view = engine.load_course(&learner, "course-x").await.unwrap();
    assert_eq!(view.progress.percentage(), 100);
    assert_eq!(view.certificate.unwrap().certificate_number, cert.certificate_number);
}

#[tokio::test]
async fn completing_course_issues_certificate_in_background() {
    let catalog: CatalogImport = serde_json::from_str(
        r#"{ "lessons": [{ "id": "only", "courseSlug": "solo", "moduleNumber": 1,
                           "lessonNumber": 1, "title": "Only lesson" }] }"#,
    )
    .unwrap();
    let store = Arc::new(MemoryStore::with_catalog(catalog));
    store.enroll("ada", "solo");
    let engine = CourseProgression::from_store(Arc::clone(&store), &Config::default());
    let learner = Viewer::signed_in("ada", "ada@example.com");

    let outcome = engine.toggle_lesson(&learner, "only", false).await.unwrap();
    assert!(outcome.progress.is_complete());

    let issued = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let Some(cert) = engine.certificate(&learner, "solo").await.unwrap() {
                return cert;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("certificate issued");
    assert_eq!(issued.course_title, "Solo");
    assert_eq!(store.snapshot().certificates.len(), 1);
}
