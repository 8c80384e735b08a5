//! Registration CRUD routes.
//!
//! - `POST   /users`       create (422 on invalid fields, 400 on a taken email)
//! - `GET    /users`       newest registrations first
//! - `GET    /users/{id}`  fetch by id
//! - `PUT    /users/{id}`  partial update
//! - `DELETE /users/{id}`  delete
//!
//! These routes address records by id only and never consult the reasoning oracle.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use regdesk_core::domain::registration::{PatchDraft, Registration, RegistrationDraft, RegistrationId};
use regdesk_core::errors::{ApplicationError, DomainError};
use regdesk_core::validation::FieldValidator;
use regdesk_db::store::DEFAULT_LIST_LIMIT;
use regdesk_db::RegistrationStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{json_body, new_correlation_id, ApiError};

#[derive(Clone)]
pub struct UsersState {
    store: RegistrationStore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: RegistrationId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Registration> for UserResponse {
    fn from(record: Registration) -> Self {
        Self {
            id: record.id,
            full_name: record.full_name,
            email: record.email,
            phone: record.phone,
            date_of_birth: record.date_of_birth,
            address: record.address,
            created_at: record.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeletedResponse {
    pub detail: &'static str,
}

pub fn router(store: RegistrationStore) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .with_state(UsersState { store })
}

fn parse_id(raw: &str, correlation_id: &str) -> Result<RegistrationId, ApiError> {
    RegistrationId::parse(raw).ok_or_else(|| {
        ApiError::new(DomainError::NotFound { identifier: raw.to_string() }, correlation_id)
    })
}

async fn load(
    store: &RegistrationStore,
    id: &RegistrationId,
    correlation_id: &str,
) -> Result<Registration, ApiError> {
    store
        .find(id)
        .await
        .map_err(|error| ApiError::new(error, correlation_id))?
        .ok_or_else(|| {
            ApiError::new(DomainError::NotFound { identifier: id.to_string() }, correlation_id)
        })
}

pub async fn create_user(
    State(state): State<UsersState>,
    payload: Result<Json<RegistrationDraft>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let draft = json_body(payload, &correlation_id)?;

    let fields = FieldValidator::current()
        .validate_new(&draft)
        .map_err(|errors| ApiError::new(ApplicationError::InvalidFields(errors), &correlation_id))?;

    let taken = state
        .store
        .find_by_email(&fields.email)
        .await
        .map_err(|error| ApiError::new(error, &correlation_id))?;
    if taken.is_some() {
        return Err(ApiError::new(DomainError::DuplicateEmail { email: fields.email }, &correlation_id));
    }

    let record =
        state.store.create(fields).await.map_err(|error| ApiError::new(error, &correlation_id))?;
    info!(
        event_name = "users.created",
        correlation_id = %correlation_id,
        registration_id = %record.id,
        "registration created"
    );
    Ok(Json(record.into()))
}

pub async fn list_users(State(state): State<UsersState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let correlation_id = new_correlation_id();
    let records = state
        .store
        .list_recent(DEFAULT_LIST_LIMIT)
        .await
        .map_err(|error| ApiError::new(error, &correlation_id))?;
    Ok(Json(records.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<UsersState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let id = parse_id(&id, &correlation_id)?;
    Ok(Json(load(&state.store, &id, &correlation_id).await?.into()))
}

pub async fn update_user(
    State(state): State<UsersState>,
    Path(id): Path<String>,
    payload: Result<Json<PatchDraft>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let id = parse_id(&id, &correlation_id)?;
    let draft = json_body(payload, &correlation_id)?;

    let patch = FieldValidator::current()
        .validate_patch(&draft)
        .map_err(|errors| ApiError::new(ApplicationError::InvalidFields(errors), &correlation_id))?;
    let record = load(&state.store, &id, &correlation_id).await?;

    if patch.is_empty() {
        return Ok(Json(record.into()));
    }

    if let Some(email) = &patch.email {
        let owner = state
            .store
            .find_by_email(email)
            .await
            .map_err(|error| ApiError::new(error, &correlation_id))?;
        if owner.is_some_and(|owner| owner.id != record.id) {
            return Err(ApiError::new(
                DomainError::DuplicateEmail { email: email.clone() },
                &correlation_id,
            ));
        }
    }

    let updated = state
        .store
        .update(&record, &patch)
        .await
        .map_err(|error| ApiError::new(error, &correlation_id))?;
    info!(
        event_name = "users.updated",
        correlation_id = %correlation_id,
        registration_id = %updated.id,
        "registration updated"
    );
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<UsersState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let correlation_id = new_correlation_id();
    let id = parse_id(&id, &correlation_id)?;
    let record = load(&state.store, &id, &correlation_id).await?;

    state.store.delete(&record).await.map_err(|error| ApiError::new(error, &correlation_id))?;
    info!(
        event_name = "users.deleted",
        correlation_id = %correlation_id,
        registration_id = %record.id,
        "registration deleted"
    );
    Ok(Json(DeletedResponse { detail: "User deleted successfully" }))
}
