//! Video watch tracking
//!
//! [`VideoSession`] is the per-viewing state machine and has no I/O; it
//! returns the effects each player event calls for. [`VideoPlayer`] runs
//! those effects: the periodic flush timer, progress upserts, and lesson
//! completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lesson::{LessonCompletionTracker, ToggleOutcome};
use crate::error::{AuthFailure, ProgressionError};
use crate::identity::Viewer;
use crate::model::{Lesson, ProgressPatch};
use crate::store::{CatalogStore, ProgressStore};

/// Playback state of one viewing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Paused,
    Playing,
    /// Watched past the threshold or to the end; terminal
    Completed,
}

/// What the driver must do in response to a player event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEffect {
    /// Start the periodic flush timer
    StartTimer,
    /// Cancel the periodic flush timer
    StopTimer,
    /// Persist the current position
    Flush(ProgressPatch),
    /// Persist the final position, then mark the lesson complete
    Complete(ProgressPatch),
}

/// State machine for a single lesson video
#[derive(Debug, Clone)]
pub struct VideoSession {
    lesson_id: String,
    state: PlaybackState,
    position: f64,
    duration: Option<f64>,
    threshold: f64,
    completion_fired: bool,
}

impl VideoSession {
    /// Start a session, positioned at the persisted resume point
    pub fn new(
        lesson_id: impl Into<String>,
        resume_position: Option<u32>,
        duration_hint: Option<u32>,
        threshold: f64,
    ) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            state: PlaybackState::Paused,
            position: resume_position.map(f64::from).unwrap_or(0.0),
            duration: duration_hint.filter(|d| *d > 0).map(f64::from),
            threshold,
            completion_fired: false,
        }
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current position in seconds
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Watched fraction, if the duration is known
    pub fn watched_fraction(&self) -> Option<f64> {
        self.duration.map(|d| (self.position / d).clamp(0.0, 1.0))
    }

    /// Progress write for the current position, if the duration is known
    pub fn sample(&self) -> Option<ProgressPatch> {
        self.duration.map(|d| ProgressPatch::video(self.position, d))
    }

    pub fn play(&mut self) -> Vec<VideoEffect> {
        match self.state {
            PlaybackState::Paused => {
                self.state = PlaybackState::Playing;
                vec![VideoEffect::StartTimer]
            }
            _ => Vec::new(),
        }
    }

    pub fn pause(&mut self) -> Vec<VideoEffect> {
        match self.state {
            PlaybackState::Playing => {
                self.state = PlaybackState::Paused;
                let mut effects = vec![VideoEffect::StopTimer];
                effects.extend(self.sample().map(VideoEffect::Flush));
                effects
            }
            _ => Vec::new(),
        }
    }

    /// Move the playhead without completing anything
    pub fn seek(&mut self, position: f64) {
        if position.is_finite() {
            self.position = position.max(0.0);
        }
    }

    /// Periodic position report from the player
    pub fn time_update(&mut self, position: f64, duration: f64) -> Vec<VideoEffect> {
        self.seek(position);
        if duration.is_finite() && duration > 0.0 {
            self.duration = Some(duration);
        }
        match self.watched_fraction() {
            Some(fraction) if fraction >= self.threshold => self.complete(),
            _ => Vec::new(),
        }
    }

    /// The player reached the end of the stream
    pub fn ended(&mut self) -> Vec<VideoEffect> {
        if let Some(duration) = self.duration {
            self.position = duration;
        }
        self.complete()
    }

    /// Session is going away; stop the timer and flush if it was running
    pub fn close(&mut self) -> Vec<VideoEffect> {
        match self.state {
            PlaybackState::Playing => self.pause(),
            _ => Vec::new(),
        }
    }

    fn complete(&mut self) -> Vec<VideoEffect> {
        if self.completion_fired {
            return Vec::new();
        }
        self.completion_fired = true;
        let was_playing = self.state == PlaybackState::Playing;
        self.state = PlaybackState::Completed;

        let mut effects = Vec::new();
        if was_playing {
            effects.push(VideoEffect::StopTimer);
        }
        let patch = self.sample().unwrap_or(ProgressPatch::Video {
            position_seconds: self.position as u32,
            watched_percentage: 100,
        });
        effects.push(VideoEffect::Complete(patch));
        effects
    }
}

/// Opens viewing sessions
pub struct VideoWatchTracker {
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    lessons: Arc<LessonCompletionTracker>,
    flush_interval: Duration,
    threshold: f64,
}

impl VideoWatchTracker {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        progress: Arc<dyn ProgressStore>,
        lessons: Arc<LessonCompletionTracker>,
        flush_interval: Duration,
        threshold: f64,
    ) -> Self {
        Self { catalog, progress, lessons, flush_interval, threshold }
    }

    /// Open a lesson video for `viewer`
    ///
    /// The lesson's module must be unlocked. Anonymous visitors may watch
    /// free previews; nothing is persisted for them. Signed-in viewers resume
    /// from their stored position.
    pub async fn open(
        &self,
        viewer: &Viewer,
        lesson_id: &str,
    ) -> Result<VideoPlayer, ProgressionError> {
        let (lesson, user_id) = match viewer.user_id() {
            Some(_) => {
                let (lesson, user_id) = self.lessons.authorize(viewer, lesson_id).await?;
                (lesson, Some(user_id.to_string()))
            }
            None => (self.preview_lesson(lesson_id).await?, None),
        };

        let resume = match &user_id {
            Some(user_id) => self
                .progress
                .lesson_progress(user_id, &[lesson.id.clone()])
                .await?
                .first()
                .and_then(|p| p.resume_position()),
            None => None,
        };

        debug!("Opened video for lesson {} (resume at {:?})", lesson.id, resume);
        let session =
            VideoSession::new(&lesson.id, resume, lesson.video_duration_seconds, self.threshold);

        Ok(VideoPlayer {
            viewer: viewer.clone(),
            user_id,
            session: Arc::new(Mutex::new(session)),
            progress: Arc::clone(&self.progress),
            lessons: Arc::clone(&self.lessons),
            flush_interval: self.flush_interval,
            timer: None,
        })
    }

    async fn preview_lesson(&self, lesson_id: &str) -> Result<Lesson, ProgressionError> {
        let lesson = self
            .catalog
            .lesson(lesson_id)
            .await?
            .ok_or_else(|| ProgressionError::not_found(format!("lesson {lesson_id}")))?;
        if !lesson.is_free_preview {
            return Err(AuthFailure::NotSignedIn.into());
        }
        self.lessons.require_unlocked(None, &lesson).await?;
        Ok(lesson)
    }
}

struct FlushTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One open lesson video
pub struct VideoPlayer {
    viewer: Viewer,
    user_id: Option<String>,
    session: Arc<Mutex<VideoSession>>,
    progress: Arc<dyn ProgressStore>,
    lessons: Arc<LessonCompletionTracker>,
    flush_interval: Duration,
    timer: Option<FlushTimer>,
}

impl std::fmt::Debug for VideoPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlayer")
            .field("viewer", &self.viewer)
            .field("user_id", &self.user_id)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

impl VideoPlayer {
    /// Position the player should seek to on load
    pub fn start_position(&self) -> f64 {
        self.with_session(|s| s.position())
    }

    pub fn state(&self) -> PlaybackState {
        self.with_session(|s| s.state())
    }

    /// Is the periodic flush timer running?
    pub fn is_flushing(&self) -> bool {
        self.timer.is_some()
    }

    pub async fn play(&mut self) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let effects = self.with_session_mut(|s| s.play());
        self.run(effects).await
    }

    pub async fn pause(&mut self) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let effects = self.with_session_mut(|s| s.pause());
        self.run(effects).await
    }

    pub fn seek(&mut self, position: f64) {
        self.with_session_mut(|s| s.seek(position));
    }

    /// Report the playhead; completes the lesson once the threshold is crossed
    pub async fn time_update(
        &mut self,
        position: f64,
        duration: f64,
    ) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let effects = self.with_session_mut(|s| s.time_update(position, duration));
        self.run(effects).await
    }

    pub async fn ended(&mut self) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let effects = self.with_session_mut(|s| s.ended());
        self.run(effects).await
    }

    /// Stop the timer and flush; in-flight writes are not cancelled
    pub async fn close(mut self) {
        let effects = self.with_session_mut(|s| s.close());
        if let Err(e) = self.run(effects).await {
            warn!("Failed to close video session: {}", e);
        }
        self.stop_timer();
    }

    async fn run(
        &mut self,
        effects: Vec<VideoEffect>,
    ) -> Result<Option<ToggleOutcome>, ProgressionError> {
        let mut outcome = None;
        for effect in effects {
            match effect {
                VideoEffect::StartTimer => self.start_timer(),
                VideoEffect::StopTimer => self.stop_timer(),
                VideoEffect::Flush(patch) => self.flush(patch).await,
                VideoEffect::Complete(patch) => {
                    self.flush(patch).await;
                    outcome = self.complete().await?;
                }
            }
        }
        Ok(outcome)
    }

    async fn complete(&self) -> Result<Option<ToggleOutcome>, ProgressionError> {
        if self.user_id.is_none() {
            return Ok(None);
        }
        let lesson_id = self.with_session(|s| s.lesson_id().to_string());
        info!("Video watched through for lesson {}", lesson_id);
        self.lessons.mark_complete(&self.viewer, &lesson_id).await
    }

    async fn flush(&self, patch: ProgressPatch) {
        let Some(user_id) = &self.user_id else {
            return;
        };
        let lesson_id = self.with_session(|s| s.lesson_id().to_string());
        if let Err(e) = self.progress.upsert_lesson_progress(user_id, &lesson_id, patch).await {
            warn!("Failed to save video progress for lesson {}: {}", lesson_id, e);
        }
    }

    fn start_timer(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        self.stop_timer();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session = Arc::clone(&self.session);
        let progress = Arc::clone(&self.progress);
        let period = self.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let (lesson_id, patch) = {
                            let s = session.lock().unwrap_or_else(|p| p.into_inner());
                            (s.lesson_id().to_string(), s.sample())
                        };
                        let Some(patch) = patch else { continue };
                        // A failed tick is retried by the next one
                        if let Err(e) = progress.upsert_lesson_progress(&user_id, &lesson_id, patch).await {
                            warn!("Video progress tick failed for lesson {}: {}", lesson_id, e);
                        }
                    }
                }
            }
        });

        self.timer = Some(FlushTimer { cancel, handle });
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
            drop(timer.handle);
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&VideoSession) -> R) -> R {
        let session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        f(&session)
    }

    fn with_session_mut<R>(&self, f: impl FnOnce(&mut VideoSession) -> R) -> R {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut session)
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
