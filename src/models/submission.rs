// src/models/submission.rs
//! Admin review submissions and compliance file metadata.

use super::issuer::LegalProof;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    Issuer,
    Recruiter,
}

/// APPROVED and REJECTED are terminal; NEEDS_UPDATE can be resubmitted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
    NeedsUpdate,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }
}

/// Opaque uploaded file metadata. Contents are never inspected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileRef {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub submission_id: String,
    pub entity_id: String,
    pub entity_name: String,
    pub role_type: RoleType,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub email: String,
    pub files: Vec<FileRef>,
    pub notes: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub proof: Option<LegalProof>,
}

/// Admin queue filter; `search` matches entity name or email, case-insensitive.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFilter {
    pub role_type: Option<RoleType>,
    pub status: Option<SubmissionStatus>,
    pub search: Option<String>,
}

impl SubmissionFilter {
    pub fn matches(&self, submission: &Submission) -> bool {
        let needle = self
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        self.role_type.map_or(true, |r| submission.role_type == r)
            && self.status.map_or(true, |s| submission.status == s)
            && needle.map_or(true, |n| {
                submission.entity_name.to_lowercase().contains(&n)
                    || submission.email.to_lowercase().contains(&n)
            })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFileStatus {
    UnderReview,
    Approved,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceFile {
    pub id: String,
    pub issuer_id: String,
    pub name: String,
    pub url: String,
    pub status: ComplianceFileStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Recruiter organisation as seen by the review queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recruiter {
    pub id: String,
    pub org_name: String,
    pub verified: bool,
    pub proof_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(name: &str, email: &str, role_type: RoleType) -> Submission {
        Submission {
            submission_id: "SUB-1001".into(),
            entity_id: "0x01".into(),
            entity_name: name.into(),
            role_type,
            status: SubmissionStatus::Pending,
            submitted_at: Utc::now(),
            email: email.into(),
            files: vec![],
            notes: String::new(),
            note: None,
            reason: None,
            proof: None,
        }
    }

    #[test]
    fn test_filter_search_matches_name_or_email() {
        let atlas = submission("Atlas University", "compliance@atlas.edu", RoleType::Issuer);
        let by_name = SubmissionFilter {
            search: Some("ATLAS".into()),
            ..Default::default()
        };
        let by_email = SubmissionFilter {
            search: Some("compliance@".into()),
            ..Default::default()
        };
        let miss = SubmissionFilter {
            role_type: Some(RoleType::Recruiter),
            ..Default::default()
        };
        assert!(by_name.matches(&atlas));
        assert!(by_email.matches(&atlas));
        assert!(!miss.matches(&atlas));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SubmissionStatus::Approved.is_terminal());
        assert!(SubmissionStatus::Rejected.is_terminal());
        assert!(!SubmissionStatus::NeedsUpdate.is_terminal());
    }
}
