use chrono::NaiveDate;
use tracing::debug;

use regdesk_core::domain::registration::{
    NewRegistration, PatchDraft, RegistrationDraft, RegistrationPatch,
};
use regdesk_core::errors::DomainError;
use regdesk_core::placeholder::PlaceholderDetector;
use regdesk_core::validation::FieldValidator;

/// Procedural checks that run before any store write requested by the oracle.
///
/// Create runs placeholder detection, then the required-field check, then field
/// validation; the first failure wins. Update drops blank values, refuses an empty
/// change set, then validates what is left.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    placeholders: PlaceholderDetector,
    today: Option<NaiveDate>,
}

impl GuardrailPolicy {
    pub fn new(placeholders: PlaceholderDetector) -> Self {
        Self { placeholders, today: None }
    }

    /// Pins the date used for date-of-birth checks.
    pub fn as_of(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn validator(&self) -> FieldValidator {
        match self.today {
            Some(today) => FieldValidator::as_of(today),
            None => FieldValidator::current(),
        }
    }

    pub fn admit_create(&self, draft: &RegistrationDraft) -> Result<NewRegistration, DomainError> {
        if let Err(error) = self.placeholders.check(draft) {
            if let DomainError::PlaceholderRejected { field, .. } = &error {
                debug!(
                    event_name = "guardrails.placeholder_rejected",
                    field = field.as_str(),
                    "placeholder value rejected"
                );
            }
            return Err(error);
        }

        let missing = draft.missing_required();
        if !missing.is_empty() {
            return Err(DomainError::MissingRequiredFields { fields: missing });
        }

        Ok(self.validator().validate_new_first(draft)?)
    }

    pub fn admit_update(&self, draft: PatchDraft) -> Result<RegistrationPatch, DomainError> {
        let draft = draft.without_blank_values();
        if draft.is_empty() {
            return Err(DomainError::NothingToUpdate);
        }

        Ok(self.validator().validate_patch_first(&draft)?)
    }
}
