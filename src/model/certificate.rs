//! Course completion certificates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof of completion, at most one per (user, course)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub user_id: String,
    pub course_slug: String,
    /// Globally unique number printed on the certificate
    pub certificate_number: String,
    /// Name printed on the certificate
    pub user_name: String,
    pub course_title: String,
    pub completion_date: DateTime<Utc>,
}

impl Certificate {
    /// Uniqueness key enforced by every store
    pub fn key(&self) -> (&str, &str) {
        (&self.user_id, &self.course_slug)
    }
}
