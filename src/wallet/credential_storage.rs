// src/wallet/credential_storage.rs
//! In-memory vault of credential records.
//!
//! Records are keyed by `record_id` for O(1) lookup, with a separate
//! insertion log so listings come back newest-first. Records are never
//! removed; revocation is a status change.

use crate::models::credential::CredentialRecord;
use std::collections::HashMap;

/// Storage for issued and uploaded credential records.
#[derive(Default, Clone)]
pub struct CredentialStorage {
    /// Records by id
    credentials: HashMap<String, CredentialRecord>,
    /// Record ids in insertion order (oldest first)
    order: Vec<String>,
}

impl CredentialStorage {
    /// Creates a new empty CredentialStorage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record.
    ///
    /// # Behavior
    /// - Overwrites an existing record with the same id in place, keeping
    ///   its original position in listings
    pub fn store_credential(&mut self, record: CredentialRecord) {
        let id = record.record_id.clone();
        if self.credentials.insert(id.clone(), record).is_none() {
            self.order.push(id);
        }
    }

    /// Retrieves a record by its id.
    pub fn get_credential(&self, id: &str) -> Option<&CredentialRecord> {
        self.credentials.get(id)
    }

    pub fn get_credential_mut(&mut self, id: &str) -> Option<&mut CredentialRecord> {
        self.credentials.get_mut(id)
    }

    /// Returns the number of stored records.
    pub fn count_credentials(&self) -> usize {
        self.credentials.len()
    }

    /// Checks if a record with the specified id exists.
    pub fn contains_credential(&self, id: &str) -> bool {
        self.credentials.contains_key(id)
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<&CredentialRecord> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.credentials.get(id))
            .collect()
    }

    /// Records bound to `candidate_id`, newest first.
    pub fn owned_by(&self, candidate_id: &str) -> Vec<&CredentialRecord> {
        self.list()
            .into_iter()
            .filter(|r| r.is_owned_by(candidate_id))
            .collect()
    }

    /// Mutable access to every record issued by `issuer_id`.
    pub fn issued_by_mut<'a>(
        &'a mut self,
        issuer_id: &'a str,
    ) -> impl Iterator<Item = &'a mut CredentialRecord> + 'a {
        self.credentials
            .values_mut()
            .filter(move |r| r.issuer_id.eq_ignore_ascii_case(issuer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::{CredentialStatus, IdCheckStatus, RecipientType, Visibility};
    use chrono::Utc;

    fn create_test_credential(id: &str, owner: &str) -> CredentialRecord {
        CredentialRecord {
            record_id: id.to_string(),
            issuer_id: "0xissuer".to_string(),
            issuer_name: "Atlas University".to_string(),
            issuer_verified: false,
            recipient_type: RecipientType::CandidateId,
            owner_candidate_id: Some(owner.to_string()),
            cccd_hash_ref: None,
            cccd_masked: None,
            credential_type: "Diploma".to_string(),
            level: "Level I".to_string(),
            issued_at: Utc::now(),
            expires_at: None,
            status: CredentialStatus::Issued,
            visibility: Visibility::Public,
            data_hash: format!("hash_{}", id),
            internal_ref: None,
            deposit_status: None,
            deposit_amount: 0,
            deposit_id: None,
            id_check_status: IdCheckStatus::NotRun,
            storage_ref: None,
            files: vec![],
        }
    }

    #[test]
    fn test_contains_credential() {
        let mut storage = CredentialStorage::new();
        let credential_id = "REC-1001";

        // Initially should not contain
        assert!(!storage.contains_credential(credential_id));

        storage.store_credential(create_test_credential(credential_id, "0xa"));
        assert!(storage.contains_credential(credential_id));
    }

    #[test]
    fn test_list_is_newest_first() {
        let mut storage = CredentialStorage::new();
        storage.store_credential(create_test_credential("REC-1", "0xa"));
        storage.store_credential(create_test_credential("REC-2", "0xb"));
        storage.store_credential(create_test_credential("REC-3", "0xa"));

        let ids: Vec<&str> = storage.list().iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["REC-3", "REC-2", "REC-1"]);

        let owned: Vec<&str> = storage.owned_by("0xa").iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(owned, vec!["REC-3", "REC-1"]);
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let mut storage = CredentialStorage::new();
        storage.store_credential(create_test_credential("REC-1", "0xa"));
        let mut updated = create_test_credential("REC-1", "0xa");
        updated.status = CredentialStatus::Revoked;
        storage.store_credential(updated);

        assert_eq!(storage.count_credentials(), 1);
        assert_eq!(storage.list().len(), 1);
        assert!(storage.get_credential("REC-1").unwrap().is_revoked());
    }

    #[test]
    fn test_issued_by_mut_matches_case_insensitively() {
        let mut storage = CredentialStorage::new();
        storage.store_credential(create_test_credential("REC-1", "0xa"));
        for record in storage.issued_by_mut("0xISSUER") {
            record.issuer_verified = true;
        }
        assert!(storage.get_credential("REC-1").unwrap().issuer_verified);
    }
}
