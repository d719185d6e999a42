//! Collaborators owned by other systems: identity, enrollment, profiles,
//! and certificate numbering

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::error::{AuthFailure, StoreError};

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    /// Visitor without a session
    Anonymous,
    /// Signed-in account
    SignedIn { user_id: String, email: String },
}

impl Viewer {
    /// Create a signed-in viewer
    pub fn signed_in(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Viewer::SignedIn { user_id: user_id.into(), email: email.into() }
    }

    /// The user id, if signed in
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::SignedIn { user_id, .. } => Some(user_id),
        }
    }

    /// The account email, if signed in
    pub fn email(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::SignedIn { email, .. } => Some(email),
        }
    }

    /// The user id, or `NotSignedIn`
    pub fn require_user(&self) -> Result<&str, AuthFailure> {
        self.user_id().ok_or(AuthFailure::NotSignedIn)
    }
}

/// Resolves the current session
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Viewer;
}

/// Fixed session, used by the CLI and tests
#[derive(Debug, Clone)]
pub struct StaticSession(pub Viewer);

impl SessionProvider for StaticSession {
    fn current(&self) -> Viewer {
        self.0.clone()
    }
}

/// Enrollment and payment status
#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn is_enrolled(&self, user_id: &str, course_slug: &str) -> Result<bool, StoreError>;
}

/// Learner profiles
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

/// Source of globally unique certificate numbers
pub trait CertificateNumberGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `LP-<year>-<12 hex digits>` from a random v4 UUID
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCertificateNumbers;

impl CertificateNumberGenerator for UuidCertificateNumbers {
    fn generate(&self) -> String {
        let id = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("LP-{}-{}", Utc::now().year(), &id[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_viewer_requires_sign_in() {
        assert_eq!(Viewer::Anonymous.require_user(), Err(AuthFailure::NotSignedIn));
        let viewer = Viewer::signed_in("u1", "u1@example.com");
        assert_eq!(viewer.require_user(), Ok("u1"));
        assert_eq!(viewer.email(), Some("u1@example.com"));
    }

    #[test]
    fn certificate_numbers_have_expected_shape() {
        let number = UuidCertificateNumbers.generate();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "LP");
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn certificate_numbers_differ() {
        assert_ne!(UuidCertificateNumbers.generate(), UuidCertificateNumbers.generate());
    }

    #[test]
    fn static_session_returns_viewer() {
        let session = StaticSession(Viewer::signed_in("u1", "a@b.c"));
        assert_eq!(session.current().user_id(), Some("u1"));
    }
}
