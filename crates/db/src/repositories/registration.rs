use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use regdesk_core::domain::registration::{Registration, RegistrationId};

use super::{RegistrationRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str =
    "SELECT id, full_name, email, phone, date_of_birth, address, created_at FROM registrations";

pub struct SqlRegistrationRepository {
    pool: DbPool,
}

impl SqlRegistrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn timestamp_to_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn date_to_text(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn row_to_registration(row: &sqlx::sqlite::SqliteRow) -> Result<Registration, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let full_name: String = row.try_get("full_name").map_err(decode)?;
    let email: String = row.try_get("email").map_err(decode)?;
    let phone: String = row.try_get("phone").map_err(decode)?;
    let date_of_birth: String = row.try_get("date_of_birth").map_err(decode)?;
    let address: Option<String> = row.try_get("address").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;

    let id = Uuid::parse_str(&id)
        .map_err(|e| RepositoryError::Decode(format!("invalid registration id `{id}`: {e}")))?;
    let date_of_birth = NaiveDate::parse_from_str(&date_of_birth, "%Y-%m-%d").map_err(|e| {
        RepositoryError::Decode(format!("invalid date_of_birth `{date_of_birth}`: {e}"))
    })?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid created_at `{created_at}`: {e}")))?;

    Ok(Registration {
        id: RegistrationId(id),
        full_name,
        email,
        phone,
        date_of_birth,
        address,
        created_at,
    })
}

#[async_trait::async_trait]
impl RegistrationRepository for SqlRegistrationRepository {
    async fn find_by_id(
        &self,
        id: &RegistrationId,
    ) -> Result<Option<Registration>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Registration>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_registration).collect()
    }

    async fn insert(&self, registration: &Registration) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO registrations (id, full_name, email, phone, date_of_birth, address, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(registration.id.0.to_string())
        .bind(&registration.full_name)
        .bind(&registration.email)
        .bind(&registration.phone)
        .bind(date_to_text(&registration.date_of_birth))
        .bind(&registration.address)
        .bind(timestamp_to_text(&registration.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, registration: &Registration) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE registrations
             SET full_name = ?, email = ?, phone = ?, date_of_birth = ?, address = ?
             WHERE id = ?",
        )
        .bind(&registration.full_name)
        .bind(&registration.email)
        .bind(&registration.phone)
        .bind(date_to_text(&registration.date_of_birth))
        .bind(&registration.address)
        .bind(registration.id.0.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &RegistrationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM registrations WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
