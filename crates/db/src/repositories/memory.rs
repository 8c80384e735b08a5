use std::collections::HashMap;

use tokio::sync::RwLock;

use regdesk_core::domain::registration::{Registration, RegistrationId};

use super::{RegistrationRepository, RepositoryError};

/// Process-local repository with the same uniqueness rules as the sql schema.
#[derive(Default)]
pub struct InMemoryRegistrationRepository {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_sequence: u64,
    // sequence breaks created_at ties the way sqlite's rowid does
    records: HashMap<RegistrationId, (u64, Registration)>,
}

impl MemoryState {
    fn email_owner(&self, email: &str) -> Option<RegistrationId> {
        self.records
            .values()
            .find(|(_, record)| record.email == email)
            .map(|(_, record)| record.id)
    }
}

fn email_conflict() -> RepositoryError {
    RepositoryError::UniqueViolation { column: "email".to_string() }
}

#[async_trait::async_trait]
impl RegistrationRepository for InMemoryRegistrationRepository {
    async fn find_by_id(
        &self,
        id: &RegistrationId,
    ) -> Result<Option<Registration>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.records.get(id).map(|(_, record)| record.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .find(|(_, record)| record.email == email)
            .map(|(_, record)| record.clone()))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Registration>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<&(u64, Registration)> = state.records.values().collect();
        entries.sort_by(|(left_seq, left), (right_seq, right)| {
            right.created_at.cmp(&left.created_at).then(right_seq.cmp(left_seq))
        });
        Ok(entries.into_iter().take(limit as usize).map(|(_, record)| record.clone()).collect())
    }

    async fn insert(&self, registration: &Registration) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&registration.id) {
            return Err(RepositoryError::UniqueViolation { column: "id".to_string() });
        }
        if state.email_owner(&registration.email).is_some() {
            return Err(email_conflict());
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.records.insert(registration.id, (sequence, registration.clone()));
        Ok(())
    }

    async fn update(&self, registration: &Registration) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(&registration.id) {
            return Ok(false);
        }
        if state.email_owner(&registration.email).is_some_and(|owner| owner != registration.id) {
            return Err(email_conflict());
        }

        if let Some((_, stored)) = state.records.get_mut(&registration.id) {
            let created_at = stored.created_at;
            *stored = registration.clone();
            stored.created_at = created_at;
        }
        Ok(true)
    }

    async fn delete(&self, id: &RegistrationId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.records.remove(id).is_some())
    }
}
