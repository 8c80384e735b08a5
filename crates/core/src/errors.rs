use thiserror::Error;

use crate::domain::registration::Field;
use crate::validation::ValidationError;

/// Prefix for messages the oracle must hand to the user word for word.
pub const RELAY_MARKER: &str = "TELL THE USER:";

/// Returns the text after [`RELAY_MARKER`], or `None` for unmarked messages.
pub fn relay_text(message: &str) -> Option<&str> {
    message.strip_prefix(RELAY_MARKER).map(str::trim)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("placeholder value rejected for {field}")]
    PlaceholderRejected { field: Field, value: String },
    #[error("missing required fields: {}", join_fields(.fields))]
    MissingRequiredFields { fields: Vec<Field> },
    #[error("no fields to update")]
    NothingToUpdate,
    #[error("email already registered: {email}")]
    DuplicateEmail { email: String },
    #[error("registration not found: {identifier}")]
    NotFound { identifier: String },
}

impl DomainError {
    /// Text that is safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(error) => match error.field {
                Field::DateOfBirth => {
                    "Invalid date of birth. Please provide a date in YYYY-MM-DD format (e.g., 1990-01-01)."
                        .to_string()
                }
                Field::Email => {
                    "Invalid email address. Please provide a valid email (e.g., user@example.com)."
                        .to_string()
                }
                Field::Phone => {
                    "Invalid phone number. Please provide a valid phone number (10-15 digits)."
                        .to_string()
                }
                Field::FullName | Field::Address => format!("Validation error: {}", error.reason),
            },
            Self::PlaceholderRejected { field, value } => format!(
                "{RELAY_MARKER} I cannot use example or placeholder data like '{value}'. \
                 Please provide the REAL {} for the person you want to register.",
                field.label()
            ),
            Self::MissingRequiredFields { fields } => format!(
                "{RELAY_MARKER} I'd be happy to help you register a new user! \
                 Please provide the following information: {}. An address is optional.",
                describe_fields(fields)
            ),
            Self::NothingToUpdate => {
                "No fields to update. Please specify what you want to change.".to_string()
            }
            Self::DuplicateEmail { email } => format!(
                "A user with email {email} already exists. Please use a different email address."
            ),
            Self::NotFound { identifier } => format!(
                "User not found with identifier: {identifier}. Please check the email or ID."
            ),
        }
    }

    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::PlaceholderRejected { .. } | Self::MissingRequiredFields { .. })
    }
}

fn join_fields(fields: &[Field]) -> String {
    fields.iter().map(Field::as_str).collect::<Vec<_>>().join(", ")
}

fn describe_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|field| match field {
            Field::DateOfBirth => "date of birth (YYYY-MM-DD format)",
            Field::Email => "email address",
            Field::Phone => "phone number",
            other => other.label(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{} invalid field(s)", .0.len())]
    InvalidFields(Vec<ValidationError>),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("stored data is unreadable: {0}")]
    Corrupted(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("unprocessable: {} field error(s)", .errors.len())]
    Unprocessable { errors: Vec<ValidationError>, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. } | Self::NotFound { message, .. } => message,
            Self::Unprocessable { .. } => "One or more fields are invalid.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(error)) => {
                Self::Unprocessable { errors: vec![error], correlation_id }
            }
            ApplicationError::InvalidFields(errors) => Self::Unprocessable { errors, correlation_id },
            ApplicationError::Domain(DomainError::DuplicateEmail { .. }) => {
                Self::BadRequest { message: "Email already registered".to_owned(), correlation_id }
            }
            ApplicationError::Domain(DomainError::NotFound { .. }) => {
                Self::NotFound { message: "User not found".to_owned(), correlation_id }
            }
            ApplicationError::Domain(
                error @ (DomainError::PlaceholderRejected { .. }
                | DomainError::MissingRequiredFields { .. }
                | DomainError::NothingToUpdate),
            ) => Self::BadRequest { message: error.to_string(), correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Corrupted(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::registration::Field;
    use crate::errors::{relay_text, ApplicationError, DomainError, InterfaceError};
    use chrono::NaiveDate;

    use crate::validation::{validate_date_of_birth, validate_phone};

    #[test]
    fn duplicate_email_maps_to_bad_request_with_fixed_detail() {
        let interface =
            ApplicationError::from(DomainError::DuplicateEmail { email: "a@b.co".to_owned() })
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref message, ref correlation_id }
                if message == "Email already registered" && correlation_id == "req-1"
        ));
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let interface =
            ApplicationError::from(DomainError::NotFound { identifier: "x".to_owned() })
                .into_interface("req-2");

        assert_eq!(interface.user_message(), "User not found");
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn validation_error_maps_to_unprocessable() {
        let error = validate_phone("12").expect_err("short phone");
        let interface = ApplicationError::from(DomainError::from(error.clone())).into_interface("r");

        assert_eq!(
            interface,
            InterfaceError::Unprocessable { errors: vec![error], correlation_id: "r".to_owned() }
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn missing_fields_message_is_relayed_and_lists_fields() {
        let error = DomainError::MissingRequiredFields {
            fields: vec![Field::Phone, Field::DateOfBirth],
        };
        let message = error.user_message();

        assert!(error.is_relayed());
        let relayed = relay_text(&message).expect("marked message");
        assert!(relayed.contains("phone number, date of birth (YYYY-MM-DD format)"));
    }

    #[test]
    fn lookup_errors_are_not_relayed() {
        let error = DomainError::NotFound { identifier: "ghost@test.com".to_owned() };
        assert!(!error.is_relayed());
        assert!(error.user_message().contains("check the email or ID"));
        assert!(relay_text(&error.user_message()).is_none());
    }

    #[test]
    fn date_of_birth_message_is_fixed_whatever_the_reason() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).expect("date");
        for raw in ["15/05/1990", "2030-01-01"] {
            let error = validate_date_of_birth(raw, today).expect_err("rejected");
            assert_eq!(
                DomainError::from(error).user_message(),
                "Invalid date of birth. Please provide a date in YYYY-MM-DD format (e.g., 1990-01-01)."
            );
        }
    }
}
