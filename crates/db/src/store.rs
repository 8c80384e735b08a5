//! Registration store adapter.
//!
//! Sits between validated field sets and the repository: assigns identity and
//! creation time, resolves caller identifiers, and turns storage conflicts into
//! domain errors.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use thiserror::Error;
use tracing::{debug, info};

use regdesk_core::domain::registration::{
    NewRegistration, Registration, RegistrationId, RegistrationPatch,
};
use regdesk_core::errors::{ApplicationError, DomainError};

use crate::repositories::{
    RegistrationRepository, RepositoryError, SqlRegistrationRepository,
};
use crate::DbPool;

pub const DEFAULT_LIST_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(error) => Self::Domain(error),
            StoreError::Repository(error @ RepositoryError::Decode(_)) => {
                Self::Corrupted(error.to_string())
            }
            StoreError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct RegistrationStore {
    repository: Arc<dyn RegistrationRepository>,
}

impl RegistrationStore {
    pub fn new(repository: Arc<dyn RegistrationRepository>) -> Self {
        Self { repository }
    }

    pub fn sql(pool: DbPool) -> Self {
        Self::new(Arc::new(SqlRegistrationRepository::new(pool)))
    }

    pub async fn find(&self, id: &RegistrationId) -> Result<Option<Registration>, StoreError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, StoreError> {
        Ok(self.repository.find_by_email(email).await?)
    }

    /// Treats `identifier` as an id first and falls back to an email lookup
    /// when it does not parse or does not match.
    pub async fn resolve(&self, identifier: &str) -> Result<Registration, StoreError> {
        let identifier = identifier.trim();

        if let Some(id) = RegistrationId::parse(identifier) {
            if let Some(record) = self.repository.find_by_id(&id).await? {
                return Ok(record);
            }
        }

        match self.repository.find_by_email(identifier).await? {
            Some(record) => Ok(record),
            None => {
                debug!(event_name = "store.resolve.miss", "identifier did not resolve");
                Err(DomainError::NotFound { identifier: identifier.to_string() }.into())
            }
        }
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Registration>, StoreError> {
        Ok(self.repository.list_recent(limit).await?)
    }

    pub async fn create(&self, fields: NewRegistration) -> Result<Registration, StoreError> {
        // Stored timestamps keep microsecond precision.
        let created_at = Utc::now().trunc_subsecs(6);
        let record = Registration::new(fields, RegistrationId::generate(), created_at);

        match self.repository.insert(&record).await {
            Ok(()) => {
                info!(
                    event_name = "store.registration.created",
                    registration_id = %record.id,
                    "registration created"
                );
                Ok(record)
            }
            Err(RepositoryError::UniqueViolation { column }) if column == "email" => {
                Err(DomainError::DuplicateEmail { email: record.email }.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Applies only the fields present in `patch`; `created_at` is preserved.
    pub async fn update(
        &self,
        record: &Registration,
        patch: &RegistrationPatch,
    ) -> Result<Registration, StoreError> {
        let mut updated = record.clone();
        updated.apply(patch);

        match self.repository.update(&updated).await {
            Ok(true) => {
                info!(
                    event_name = "store.registration.updated",
                    registration_id = %updated.id,
                    "registration updated"
                );
                Ok(updated)
            }
            Ok(false) => Err(DomainError::NotFound { identifier: record.id.to_string() }.into()),
            Err(RepositoryError::UniqueViolation { column }) if column == "email" => {
                Err(DomainError::DuplicateEmail { email: updated.email }.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn delete(&self, record: &Registration) -> Result<(), StoreError> {
        if self.repository.delete(&record.id).await? {
            info!(
                event_name = "store.registration.deleted",
                registration_id = %record.id,
                "registration deleted"
            );
            return Ok(());
        }
        Err(DomainError::NotFound { identifier: record.id.to_string() }.into())
    }
}
