use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use regdesk_core::domain::registration::{Field, Registration, RegistrationId};
use regdesk_core::errors::{relay_text, DomainError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionName {
    CreateRegistration,
    GetRegistration,
    UpdateRegistration,
    DeleteRegistration,
}

impl ActionName {
    pub const ALL: [Self; 4] = [
        Self::CreateRegistration,
        Self::GetRegistration,
        Self::UpdateRegistration,
        Self::DeleteRegistration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRegistration => "create_registration",
            Self::GetRegistration => "get_registration",
            Self::UpdateRegistration => "update_registration",
            Self::DeleteRegistration => "delete_registration",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == raw.trim())
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the oracle is told about one action: name, usage guidance and a JSON schema
/// for its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionSpec {
    pub name: ActionName,
    pub description: &'static str,
    pub parameters: Value,
}

impl ActionSpec {
    /// Function-tool declaration in the shape chat-completion backends accept.
    pub fn to_tool_declaration(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name.as_str(),
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// An action request as the oracle produced it. The name is unchecked until dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self { name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionFailure {
    pub message: String,
    pub rejected_field: Option<Field>,
    pub missing_fields: Vec<Field>,
}

impl ActionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), rejected_field: None, missing_fields: Vec::new() }
    }

    pub fn relay_text(&self) -> Option<&str> {
        relay_text(&self.message)
    }
}

impl From<DomainError> for ActionFailure {
    fn from(error: DomainError) -> Self {
        let mut failure = Self::new(error.user_message());
        match error {
            DomainError::PlaceholderRejected { field, .. } => failure.rejected_field = Some(field),
            DomainError::MissingRequiredFields { fields } => failure.missing_fields = fields,
            _ => {}
        }
        failure
    }
}

/// Result of one action execution. Only [`ActionOutcome::encode`] turns it into text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Created { id: RegistrationId, full_name: String },
    Found(Registration),
    Updated { id: RegistrationId },
    Deleted,
    Failed(ActionFailure),
}

impl ActionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(ActionFailure::new(message))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Found(_) => "found",
            Self::Updated { .. } => "updated",
            Self::Deleted => "deleted",
            Self::Failed(_) => "failed",
        }
    }

    pub fn to_payload(&self) -> Value {
        match self {
            Self::Created { id, full_name } => json!({
                "id": id.to_string(),
                "status": "success",
                "message": format!("Successfully created registration for {full_name}"),
            }),
            Self::Found(record) => json!({
                "id": record.id.to_string(),
                "full_name": record.full_name,
                "email": record.email,
                "phone": record.phone,
                "date_of_birth": record.date_of_birth.to_string(),
                "address": record.address,
            }),
            Self::Updated { id } => json!({ "status": "ok", "id": id.to_string() }),
            Self::Deleted => json!({ "status": "deleted" }),
            Self::Failed(failure) => {
                let mut payload = json!({ "error": failure.message });
                if let Some(field) = failure.rejected_field {
                    payload["rejected_field"] = json!(field.as_str());
                }
                if !failure.missing_fields.is_empty() {
                    payload["missing_fields"] = json!(failure
                        .missing_fields
                        .iter()
                        .map(Field::as_str)
                        .collect::<Vec<_>>());
                }
                payload
            }
        }
    }

    /// Tool-result text handed back to the oracle.
    pub fn encode(&self) -> String {
        self.to_payload().to_string()
    }

    /// Text that must reach the user unchanged, if any.
    pub fn relay_text(&self) -> Option<&str> {
        match self {
            Self::Failed(failure) => failure.relay_text(),
            _ => None,
        }
    }

    /// Plain reply used when the oracle cannot phrase the outcome itself.
    pub fn summary(&self) -> String {
        match self {
            Self::Created { full_name, .. } => {
                format!("Successfully created registration for {full_name}.")
            }
            Self::Found(record) => format!(
                "Found registration for {} ({}, {}, born {}).",
                record.full_name, record.email, record.phone, record.date_of_birth
            ),
            Self::Updated { .. } => "The registration has been updated.".to_string(),
            Self::Deleted => "The registration has been deleted.".to_string(),
            Self::Failed(failure) => {
                failure.relay_text().map(str::to_string).unwrap_or_else(|| failure.message.clone())
            }
        }
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> ActionSpec;
    async fn execute(&self, arguments: Value) -> ActionOutcome;
}

#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionName, Box<dyn Action>>,
}

impl ActionRegistry {
    /// Registers `action`, replacing any action previously registered under the same name.
    pub fn register<T>(&mut self, action: T)
    where
        T: Action + 'static,
    {
        self.actions.insert(action.spec().name, Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Specs in a stable order so prompts do not change between turns.
    pub fn specs(&self) -> Vec<ActionSpec> {
        ActionName::ALL
            .into_iter()
            .filter_map(|name| self.actions.get(&name).map(|action| action.spec()))
            .collect()
    }

    pub async fn dispatch(&self, call: &ActionCall) -> ActionOutcome {
        let action = ActionName::parse(&call.name).and_then(|name| self.actions.get(&name));
        match action {
            Some(action) => action.execute(call.arguments.clone()).await,
            None => {
                let available =
                    self.specs().iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>();
                ActionOutcome::failed(format!(
                    "Unknown action '{}'. Available actions: {}.",
                    call.name,
                    available.join(", ")
                ))
            }
        }
    }
}
