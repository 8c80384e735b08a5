use async_trait::async_trait;
use thiserror::Error;

use regdesk_core::domain::registration::{Registration, RegistrationId};

pub mod memory;
pub mod registration;

pub use memory::InMemoryRegistrationRepository;
pub use registration::SqlRegistrationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unique constraint violated on `{column}`")]
    UniqueViolation { column: String },
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if database_error.is_unique_violation() {
                // sqlite reports "UNIQUE constraint failed: <table>.<column>"
                let column = database_error
                    .message()
                    .rsplit('.')
                    .next()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                return Self::UniqueViolation { column };
            }
        }
        Self::Database(error)
    }
}

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn find_by_id(&self, id: &RegistrationId)
        -> Result<Option<Registration>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, RepositoryError>;

    /// Newest first by `created_at`.
    async fn list_recent(&self, limit: u32) -> Result<Vec<Registration>, RepositoryError>;

    async fn insert(&self, registration: &Registration) -> Result<(), RepositoryError>;

    /// Overwrites the mutable columns. Returns `false` when the row no longer exists.
    async fn update(&self, registration: &Registration) -> Result<bool, RepositoryError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: &RegistrationId) -> Result<bool, RepositoryError>;
}
