//! Certificate issuance
//!
//! Issuance is idempotent: an existing certificate short-circuits, and when
//! two triggers race past that check the store's uniqueness constraint lets
//! exactly one insert through. The loser reports [`IssueOutcome::LostRace`],
//! which is a success.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProgressionError, StoreError};
use crate::events::ProgressEvent;
use crate::identity::{CertificateNumberGenerator, ProfileService};
use crate::model::lesson::title_from_slug;
use crate::model::Certificate;
use crate::store::{CatalogStore, CertificateStore, ProgressStore};
use crate::tracker::lesson::count_course_progress;
use crate::tracker::CourseProgress;

/// Name printed when neither a display name nor an email is known
pub const FALLBACK_NAME: &str = "Student";

/// What a call to [`CertificateIssuer::issue_if_eligible`] did
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    /// A new certificate was stored
    Issued(Certificate),
    /// One already existed, nothing written
    AlreadyIssued,
    /// A concurrent trigger inserted first
    LostRace,
    /// The course is not complete (yet)
    NotEligible(CourseProgress),
}

impl IssueOutcome {
    /// The learner now holds a certificate
    pub fn has_certificate(&self) -> bool {
        !matches!(self, IssueOutcome::NotEligible(_))
    }
}

/// Result of one event handled by the listener
#[derive(Debug)]
pub struct IssueReport {
    pub user_id: String,
    pub course_slug: String,
    pub result: Result<IssueOutcome, ProgressionError>,
}

/// Creates certificates once every lesson of a course is complete
pub struct CertificateIssuer {
    certificates: Arc<dyn CertificateStore>,
    catalog: Arc<dyn CatalogStore>,
    progress: Arc<dyn ProgressStore>,
    profiles: Arc<dyn ProfileService>,
    numbers: Arc<dyn CertificateNumberGenerator>,
}

impl CertificateIssuer {
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        catalog: Arc<dyn CatalogStore>,
        progress: Arc<dyn ProgressStore>,
        profiles: Arc<dyn ProfileService>,
        numbers: Arc<dyn CertificateNumberGenerator>,
    ) -> Self {
        Self { certificates, catalog, progress, profiles, numbers }
    }

    /// The learner's certificate for a course, if issued
    pub async fn certificate(
        &self,
        user_id: &str,
        course_slug: &str,
    ) -> Result<Option<Certificate>, ProgressionError> {
        Ok(self.certificates.certificate(user_id, course_slug).await?)
    }

    /// Issue a certificate if the course is complete and none exists
    ///
    /// `email` is the account email, used as the printed name when the
    /// profile has none.
    pub async fn issue_if_eligible(
        &self,
        user_id: &str,
        email: Option<&str>,
        course_slug: &str,
    ) -> Result<IssueOutcome, ProgressionError> {
        if self.certificates.certificate(user_id, course_slug).await?.is_some() {
            debug!("Certificate for {} in {} already issued", user_id, course_slug);
            return Ok(IssueOutcome::AlreadyIssued);
        }

        let progress = count_course_progress(
            self.catalog.as_ref(),
            self.progress.as_ref(),
            user_id,
            course_slug,
        )
        .await?;
        if !progress.is_complete() {
            debug!(
                "{} not eligible for {} certificate ({}/{})",
                user_id, course_slug, progress.completed, progress.total
            );
            return Ok(IssueOutcome::NotEligible(progress));
        }

        let user_name = self
            .profiles
            .display_name(user_id)
            .await?
            .filter(|name| !name.trim().is_empty())
            .or_else(|| email.filter(|e| !e.is_empty()).map(str::to_string))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        let course_title = self
            .catalog
            .course_title(course_slug)
            .await?
            .unwrap_or_else(|| title_from_slug(course_slug));

        let certificate = Certificate {
            user_id: user_id.to_string(),
            course_slug: course_slug.to_string(),
            certificate_number: self.numbers.generate(),
            user_name,
            course_title,
            completion_date: Utc::now(),
        };

        match self.certificates.insert_certificate(certificate.clone()).await {
            Ok(()) => {
                info!(
                    "Issued certificate {} to {} for {}",
                    certificate.certificate_number, user_id, course_slug
                );
                Ok(IssueOutcome::Issued(certificate))
            }
            Err(StoreError::UniqueViolation { entity: "certificate", .. }) => {
                debug!("Certificate for {} in {} inserted concurrently", user_id, course_slug);
                Ok(IssueOutcome::LostRace)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Issue certificates in the background as courses are completed
    ///
    /// Every handled `CourseCompleted` event produces one [`IssueReport`],
    /// dropped if the receiver is full or gone. Failures are logged and not
    /// retried; toggling a lesson again re-triggers the check.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ProgressEvent>,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::Receiver<IssueReport>) {
        let (tx, rx) = mpsc::channel(32);

        let handle = tokio::spawn(async move {
            info!("Certificate listener started");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                let (user_id, email, course_slug) = match event {
                    Ok(ProgressEvent::CourseCompleted { user_id, email, course_slug }) => {
                        (user_id, email, course_slug)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Certificate listener skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let result = self.issue_if_eligible(&user_id, email.as_deref(), &course_slug).await;
                if let Err(e) = &result {
                    error!("Certificate issuance failed for {} in {}: {}", user_id, course_slug, e);
                }

                // Reports are informational; a full or closed channel drops them
                if tx.try_send(IssueReport { user_id, course_slug, result }).is_err() {
                    debug!("Certificate report dropped, nobody is reading");
                }
            }
            info!("Certificate listener stopped");
        });

        (handle, rx)
    }
}
