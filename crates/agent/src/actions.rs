use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use regdesk_core::domain::registration::{Field, PatchDraft, RegistrationDraft};
use regdesk_db::{RegistrationStore, StoreError};

use crate::guardrails::GuardrailPolicy;
use crate::tools::{Action, ActionName, ActionOutcome, ActionRegistry, ActionSpec};

const STORAGE_FAILURE: &str =
    "I couldn't reach the registration records right now. Please try again in a moment.";
const MISSING_IDENTIFIER: &str =
    "Please provide the email address or ID of the registration you mean.";
const UNREADABLE_ARGUMENTS: &str =
    "I couldn't read the details for that request. Please provide them again.";

/// Builds the registry with the four registration actions wired to `store`.
pub fn registration_actions(store: RegistrationStore, guardrails: GuardrailPolicy) -> ActionRegistry {
    let guardrails = Arc::new(guardrails);
    let mut registry = ActionRegistry::default();
    registry.register(CreateRegistration { store: store.clone(), guardrails: Arc::clone(&guardrails) });
    registry.register(GetRegistration { store: store.clone() });
    registry.register(UpdateRegistration { store: store.clone(), guardrails });
    registry.register(DeleteRegistration { store });
    registry
}

fn storage_failure(action: ActionName, error: StoreError) -> ActionOutcome {
    match error {
        StoreError::Domain(error) => ActionOutcome::Failed(error.into()),
        StoreError::Repository(error) => {
            warn!(
                event_name = "chat.action.storage_failed",
                action = action.as_str(),
                error = %error,
                "registration store failed"
            );
            ActionOutcome::failed(STORAGE_FAILURE)
        }
    }
}

/// Oracles sometimes send numbers for phone-like fields; anything scalar is taken as text.
fn text_arg(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn identifier_arg(arguments: &Value) -> Option<String> {
    let identifier = match arguments {
        Value::String(raw) => Some(raw.clone()),
        Value::Object(map) => ["identifier", "id", "user_id"]
            .into_iter()
            .find_map(|key| text_arg(map, key).filter(|value| !value.trim().is_empty())),
        _ => None,
    };
    identifier.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn string_schema(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn identifier_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { "identifier": string_schema(description) },
        "required": ["identifier"],
    })
}

struct CreateRegistration {
    store: RegistrationStore,
    guardrails: Arc<GuardrailPolicy>,
}

#[async_trait]
impl Action for CreateRegistration {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: ActionName::CreateRegistration,
            description: "Creates a new user registration. full_name, email, phone and \
                date_of_birth are ALL required and must be the user's real values. Never invent, \
                assume or default a value; ask the user for anything missing instead of calling \
                this action.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "full_name": string_schema("User's REAL full name (required)"),
                    "email": string_schema("User's REAL email address (required)"),
                    "phone": string_schema("User's REAL phone number (required)"),
                    "date_of_birth": string_schema("Date of birth in YYYY-MM-DD format (required)"),
                    "address": string_schema("User's address (optional)"),
                },
                "required": ["full_name", "email", "phone", "date_of_birth"],
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ActionOutcome {
        let Value::Object(arguments) = arguments else {
            return ActionOutcome::failed(UNREADABLE_ARGUMENTS);
        };
        let draft = RegistrationDraft {
            full_name: text_arg(&arguments, Field::FullName.as_str()),
            email: text_arg(&arguments, Field::Email.as_str()),
            phone: text_arg(&arguments, Field::Phone.as_str()),
            date_of_birth: text_arg(&arguments, Field::DateOfBirth.as_str()),
            address: text_arg(&arguments, Field::Address.as_str()),
        };

        let fields = match self.guardrails.admit_create(&draft) {
            Ok(fields) => fields,
            Err(error) => return ActionOutcome::Failed(error.into()),
        };

        match self.store.create(fields).await {
            Ok(record) => {
                info!(
                    event_name = "chat.action.created",
                    registration_id = %record.id,
                    "registration created from chat"
                );
                ActionOutcome::Created { id: record.id, full_name: record.full_name }
            }
            Err(error) => storage_failure(ActionName::CreateRegistration, error),
        }
    }
}

struct GetRegistration {
    store: RegistrationStore,
}

#[async_trait]
impl Action for GetRegistration {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: ActionName::GetRegistration,
            description: "Gets a user registration by email address or ID.",
            parameters: identifier_schema("User's email or ID (required)"),
        }
    }

    async fn execute(&self, arguments: Value) -> ActionOutcome {
        let Some(identifier) = identifier_arg(&arguments) else {
            return ActionOutcome::failed(MISSING_IDENTIFIER);
        };
        match self.store.resolve(&identifier).await {
            Ok(record) => ActionOutcome::Found(record),
            Err(error) => storage_failure(ActionName::GetRegistration, error),
        }
    }
}

struct UpdateRegistration {
    store: RegistrationStore,
    guardrails: Arc<GuardrailPolicy>,
}

#[async_trait]
impl Action for UpdateRegistration {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: ActionName::UpdateRegistration,
            description: "Updates an existing user registration. Only include the fields the \
                user asked to change in `updates`.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "identifier": string_schema("User's email or ID (required)"),
                    "updates": {
                        "type": "object",
                        "description": "Fields to change (only the ones the user asked for)",
                        "properties": {
                            "full_name": string_schema("Updated full name"),
                            "email": string_schema("Updated email"),
                            "phone": string_schema("Updated phone"),
                            "date_of_birth": string_schema("Updated date of birth (YYYY-MM-DD)"),
                            "address": string_schema("Updated address"),
                        },
                    },
                },
                "required": ["identifier", "updates"],
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ActionOutcome {
        let Some(identifier) = identifier_arg(&arguments) else {
            return ActionOutcome::failed(MISSING_IDENTIFIER);
        };
        // Changes may be nested under `updates` or given next to the identifier.
        let changes = match arguments.get("updates") {
            Some(Value::Object(updates)) => updates.clone(),
            _ => arguments.as_object().cloned().unwrap_or_default(),
        };
        let draft = PatchDraft {
            full_name: text_arg(&changes, Field::FullName.as_str()),
            email: text_arg(&changes, Field::Email.as_str()),
            phone: text_arg(&changes, Field::Phone.as_str()),
            date_of_birth: text_arg(&changes, Field::DateOfBirth.as_str()),
            address: text_arg(&changes, Field::Address.as_str()),
        };

        let patch = match self.guardrails.admit_update(draft) {
            Ok(patch) => patch,
            Err(error) => return ActionOutcome::Failed(error.into()),
        };

        let record = match self.store.resolve(&identifier).await {
            Ok(record) => record,
            Err(error) => return storage_failure(ActionName::UpdateRegistration, error),
        };

        match self.store.update(&record, &patch).await {
            Ok(updated) => ActionOutcome::Updated { id: updated.id },
            Err(error) => storage_failure(ActionName::UpdateRegistration, error),
        }
    }
}

struct DeleteRegistration {
    store: RegistrationStore,
}

#[async_trait]
impl Action for DeleteRegistration {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            name: ActionName::DeleteRegistration,
            description: "Deletes a user registration by email address or ID.",
            parameters: identifier_schema("User's email or ID to delete (required)"),
        }
    }

    async fn execute(&self, arguments: Value) -> ActionOutcome {
        let Some(identifier) = identifier_arg(&arguments) else {
            return ActionOutcome::failed(MISSING_IDENTIFIER);
        };
        let record = match self.store.resolve(&identifier).await {
            Ok(record) => record,
            Err(error) => return storage_failure(ActionName::DeleteRegistration, error),
        };
        match self.store.delete(&record).await {
            Ok(()) => ActionOutcome::Deleted,
            Err(error) => storage_failure(ActionName::DeleteRegistration, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use regdesk_core::domain::registration::Field;
    use regdesk_db::{InMemoryRegistrationRepository, RegistrationStore};

    use super::{identifier_arg, registration_actions};
    use crate::guardrails::GuardrailPolicy;
    use crate::tools::{ActionCall, ActionName, ActionOutcome, ActionRegistry};

    fn registry() -> (ActionRegistry, RegistrationStore) {
        let store = RegistrationStore::new(Arc::new(InMemoryRegistrationRepository::default()));
        let guardrails =
            GuardrailPolicy::default().as_of(NaiveDate::from_ymd_opt(2026, 10, 15).expect("date"));
        (registration_actions(store.clone(), guardrails), store)
    }

    fn alice() -> Value {
        json!({
            "full_name": "Alice Smith",
            "email": "alice@test.com",
            "phone": "555-123-4567",
            "date_of_birth": "1990-05-15",
        })
    }

    async fn run(registry: &ActionRegistry, name: ActionName, arguments: Value) -> ActionOutcome {
        registry.dispatch(&ActionCall::new(name.as_str(), arguments)).await
    }

    #[test]
    fn registry_exposes_four_actions_in_stable_order() {
        let (registry, _) = registry();
        let names = registry.specs().iter().map(|spec| spec.name).collect::<Vec<_>>();
        assert_eq!(names, ActionName::ALL.to_vec());
        assert!(registry.specs()[0].description.contains("ALL required"));
    }

    #[test]
    fn identifier_accepts_bare_string_and_aliases() {
        assert_eq!(identifier_arg(&json!(" a@b.co ")), Some("a@b.co".to_string()));
        assert_eq!(identifier_arg(&json!({ "user_id": "abc" })), Some("abc".to_string()));
        assert_eq!(identifier_arg(&json!({ "identifier": "" })), None);
        assert_eq!(identifier_arg(&Value::Null), None);
    }

    #[tokio::test]
    async fn create_then_duplicate_then_get_by_email_and_id() {
        let (registry, store) = registry();

        let created = run(&registry, ActionName::CreateRegistration, alice()).await;
        let id = match created {
            ActionOutcome::Created { id, .. } => id,
            other => panic!("expected created, got {other:?}"),
        };
        assert_eq!(store.find(&id).await.expect("find").expect("stored").phone, "5551234567");

        let duplicate = run(&registry, ActionName::CreateRegistration, alice()).await;
        assert_eq!(
            duplicate.to_payload()["error"],
            "A user with email alice@test.com already exists. Please use a different email address."
        );

        let by_email =
            run(&registry, ActionName::GetRegistration, json!({ "identifier": "alice@test.com" })).await;
        let by_id =
            run(&registry, ActionName::GetRegistration, json!({ "identifier": id.to_string() })).await;
        assert_eq!(by_email, by_id);
        assert!(matches!(by_email, ActionOutcome::Found(ref record) if record.id == id));
    }

    #[tokio::test]
    async fn placeholder_rejection_never_reaches_the_store() {
        let (registry, store) = registry();

        let outcome = run(
            &registry,
            ActionName::CreateRegistration,
            json!({ "full_name": "John Doe", "email": "john.doe@example.com" }),
        )
        .await;

        let payload = outcome.to_payload();
        assert_eq!(payload["rejected_field"], Field::FullName.as_str());
        assert!(outcome.relay_text().is_some());
        assert!(store.list_recent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn incomplete_create_lists_missing_fields() {
        let (registry, store) = registry();

        let outcome = run(
            &registry,
            ActionName::CreateRegistration,
            json!({ "full_name": "Anu Raman", "email": "anu@gmail.com", "phone": 9989898989u64 }),
        )
        .await;

        assert_eq!(outcome.to_payload()["missing_fields"], json!(["date_of_birth"]));
        assert!(store.list_recent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_accepts_nested_or_flat_changes() {
        let (registry, store) = registry();
        run(&registry, ActionName::CreateRegistration, alice()).await;

        let nested = run(
            &registry,
            ActionName::UpdateRegistration,
            json!({ "identifier": "alice@test.com", "updates": { "phone": "+1 555 000 1111" } }),
        )
        .await;
        assert!(matches!(nested, ActionOutcome::Updated { .. }));

        let flat = run(
            &registry,
            ActionName::UpdateRegistration,
            json!({ "user_id": "alice@test.com", "address": "1 Main St" }),
        )
        .await;
        assert!(matches!(flat, ActionOutcome::Updated { .. }));

        let record = store.resolve("alice@test.com").await.expect("resolve");
        assert_eq!(record.phone, "+15550001111");
        assert_eq!(record.address.as_deref(), Some("1 Main St"));
        assert_eq!(record.full_name, "Alice Smith");
    }

    #[tokio::test]
    async fn update_without_changes_or_target_fails_softly() {
        let (registry, _) = registry();
        run(&registry, ActionName::CreateRegistration, alice()).await;

        let empty = run(
            &registry,
            ActionName::UpdateRegistration,
            json!({ "identifier": "alice@test.com", "updates": {} }),
        )
        .await;
        assert_eq!(
            empty.to_payload()["error"],
            "No fields to update. Please specify what you want to change."
        );

        let missing = run(
            &registry,
            ActionName::UpdateRegistration,
            json!({ "identifier": "ghost@test.com", "updates": { "full_name": "Ghost Writer" } }),
        )
        .await;
        assert_eq!(
            missing.to_payload()["error"],
            "User not found with identifier: ghost@test.com. Please check the email or ID."
        );
    }

    #[tokio::test]
    async fn delete_resolves_then_removes() {
        let (registry, store) = registry();
        run(&registry, ActionName::CreateRegistration, alice()).await;

        let deleted =
            run(&registry, ActionName::DeleteRegistration, json!("alice@test.com")).await;
        assert_eq!(deleted, ActionOutcome::Deleted);
        assert!(store.find_by_email("alice@test.com").await.expect("lookup").is_none());

        let again =
            run(&registry, ActionName::DeleteRegistration, json!({ "identifier": "alice@test.com" }))
                .await;
        assert!(again.is_failure());
    }
}
