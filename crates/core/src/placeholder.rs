//! Rejects well-known example and template values.
//!
//! This is a best-effort guard against the oracle echoing its own examples
//! back as user data. It is not an abuse control: anything outside the fixed
//! lists passes.

use crate::domain::registration::{Field, RegistrationDraft};
use crate::errors::DomainError;

const FULL_NAMES: &[&str] = &["john doe", "jane doe", "test user", "example user", "user name"];
const EMAILS: &[&str] = &[
    "john.doe@example.com",
    "jane.doe@example.com",
    "test@example.com",
    "user@example.com",
    "example@example.com",
];
const PHONES: &[&str] = &["1234567890", "0000000000", "9999999999"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderDetector {
    deny_lists: Vec<(Field, Vec<String>)>,
}

impl Default for PlaceholderDetector {
    fn default() -> Self {
        let owned = |values: &[&str]| values.iter().map(|value| value.to_string()).collect();
        Self {
            deny_lists: vec![
                (Field::FullName, owned(FULL_NAMES)),
                (Field::Email, owned(EMAILS)),
                (Field::Phone, owned(PHONES)),
            ],
        }
    }
}

impl PlaceholderDetector {
    /// Adds `value` to the deny-list for `field`. Matching is case-insensitive on trimmed input.
    pub fn deny(mut self, field: Field, value: &str) -> Self {
        let value = value.trim().to_lowercase();
        match self.deny_lists.iter_mut().find(|(listed, _)| *listed == field) {
            Some((_, values)) => values.push(value),
            None => self.deny_lists.push((field, vec![value])),
        }
        self
    }

    pub fn is_placeholder(&self, field: Field, value: &str) -> bool {
        let normalized = value.trim().to_lowercase();
        self.deny_lists
            .iter()
            .filter(|(listed, _)| *listed == field)
            .any(|(_, values)| values.iter().any(|denied| *denied == normalized))
    }

    /// Checks fields in list order and reports the first match. Absent fields never match.
    pub fn check(&self, draft: &RegistrationDraft) -> Result<(), DomainError> {
        for (field, _) in &self.deny_lists {
            if let Some(value) = draft.value(*field) {
                if self.is_placeholder(*field, value) {
                    return Err(DomainError::PlaceholderRejected {
                        field: *field,
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
