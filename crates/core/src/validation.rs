//! Field normalization and validation for registration data.
//!
//! Every check works on one raw value and either returns the normalized value
//! or a [`ValidationError`] naming the field. The same rules back the CRUD
//! surface (which reports every failing field) and the conversational actions
//! (which stop at the first failure).

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;

use crate::domain::registration::{
    Field, NewRegistration, PatchDraft, RegistrationDraft, RegistrationPatch,
};

pub const MIN_FULL_NAME_LEN: usize = 2;
pub const MAX_FULL_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 200;
pub const MAX_ADDRESS_LEN: usize = 500;
pub const MAX_AGE_YEARS: i32 = 150;

const EMAIL_PATTERN: &str = concat!(
    r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*",
    r"@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+",
    r"[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$",
);
const PHONE_PATTERN: &str = r"^\+?\d{10,15}$";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: String,
}

impl ValidationError {
    fn new(field: Field, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern must compile"))
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(PHONE_PATTERN).expect("phone pattern must compile"))
}

pub fn validate_full_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(Field::FullName, "Full name cannot be empty"));
    }

    let length = trimmed.chars().count();
    if length < MIN_FULL_NAME_LEN {
        return Err(ValidationError::new(
            Field::FullName,
            "Full name must be at least 2 characters long",
        ));
    }
    if length > MAX_FULL_NAME_LEN {
        return Err(ValidationError::new(
            Field::FullName,
            "Full name must be at most 200 characters long",
        ));
    }

    Ok(trimmed.to_string())
}

/// Syntactic check only. The address is returned as supplied, case included.
pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    if raw.chars().count() > MAX_EMAIL_LEN || !email_regex().is_match(raw) {
        return Err(ValidationError::new(Field::Email, "Invalid email address"));
    }
    Ok(raw.to_string())
}

/// Strips whitespace, hyphens, parentheses and dots, then expects an optional
/// leading `+` followed by 10 to 15 digits.
pub fn validate_phone(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !(ch.is_whitespace() || matches!(ch, '-' | '(' | ')' | '.')))
        .collect();

    if !phone_regex().is_match(&cleaned) {
        return Err(ValidationError::new(
            Field::Phone,
            "Phone number must be 10-15 digits, optionally starting with +",
        ));
    }
    Ok(cleaned)
}

pub fn parse_date_of_birth(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ValidationError::new(
            Field::DateOfBirth,
            "Date of birth must be in YYYY-MM-DD format (e.g., 1990-01-01)",
        )
    })
}

pub fn check_date_of_birth(date: NaiveDate, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    if date >= today {
        return Err(ValidationError::new(Field::DateOfBirth, "Date of birth must be in the past"));
    }
    if age_in_years(date, today) > MAX_AGE_YEARS {
        return Err(ValidationError::new(
            Field::DateOfBirth,
            "Date of birth seems unrealistic (age > 150 years)",
        ));
    }
    Ok(date)
}

pub fn validate_date_of_birth(raw: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    check_date_of_birth(parse_date_of_birth(raw)?, today)
}

/// Empty strings pass through unchanged.
pub fn validate_address(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    match raw {
        Some(value) if value.chars().count() > MAX_ADDRESS_LEN => Err(ValidationError::new(
            Field::Address,
            "Address must be at most 500 characters long",
        )),
        Some(value) => Ok(Some(value.to_string())),
        None => Ok(None),
    }
}

fn age_in_years(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}

/// Validates whole drafts against a fixed "today".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldValidator {
    today: NaiveDate,
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::current()
    }
}

impl FieldValidator {
    pub fn current() -> Self {
        Self { today: Utc::now().date_naive() }
    }

    pub fn as_of(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Collects every failing field, in field order. Absent required fields
    /// are reported as `Field required`.
    pub fn validate_new(&self, draft: &RegistrationDraft) -> Result<NewRegistration, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let full_name = required(draft.full_name.as_deref(), Field::FullName, &mut errors)
            .and_then(|raw| collect(validate_full_name(raw), &mut errors));
        let email = required(draft.email.as_deref(), Field::Email, &mut errors)
            .and_then(|raw| collect(validate_email(raw), &mut errors));
        let phone = required(draft.phone.as_deref(), Field::Phone, &mut errors)
            .and_then(|raw| collect(validate_phone(raw), &mut errors));
        let date_of_birth = required(draft.date_of_birth.as_deref(), Field::DateOfBirth, &mut errors)
            .and_then(|raw| collect(validate_date_of_birth(raw, self.today), &mut errors));
        let address = collect(validate_address(draft.address.as_deref()), &mut errors).flatten();

        match (full_name, email, phone, date_of_birth) {
            (Some(full_name), Some(email), Some(phone), Some(date_of_birth)) if errors.is_empty() => {
                Ok(NewRegistration { full_name, email, phone, date_of_birth, address })
            }
            _ => Err(errors),
        }
    }

    /// Stops at the first failing field.
    pub fn validate_new_first(&self, draft: &RegistrationDraft) -> Result<NewRegistration, ValidationError> {
        self.validate_new(draft).map_err(first_error)
    }

    /// Validates only the fields present in `draft`.
    pub fn validate_patch(&self, draft: &PatchDraft) -> Result<RegistrationPatch, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let full_name = draft
            .full_name
            .as_deref()
            .and_then(|raw| collect(validate_full_name(raw), &mut errors));
        let email =
            draft.email.as_deref().and_then(|raw| collect(validate_email(raw), &mut errors));
        let phone =
            draft.phone.as_deref().and_then(|raw| collect(validate_phone(raw), &mut errors));
        let date_of_birth = draft
            .date_of_birth
            .as_deref()
            .and_then(|raw| collect(validate_date_of_birth(raw, self.today), &mut errors));
        let address = collect(validate_address(draft.address.as_deref()), &mut errors).flatten();

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(RegistrationPatch { full_name, email, phone, date_of_birth, address })
    }

    pub fn validate_patch_first(&self, draft: &PatchDraft) -> Result<RegistrationPatch, ValidationError> {
        self.validate_patch(draft).map_err(first_error)
    }
}

fn required<'a>(
    value: Option<&'a str>,
    field: Field,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a str> {
    if value.is_none() {
        errors.push(ValidationError::new(field, "Field required"));
    }
    value
}

fn collect<T>(result: Result<T, ValidationError>, errors: &mut Vec<ValidationError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            errors.push(error);
            None
        }
    }
}

fn first_error(mut errors: Vec<ValidationError>) -> ValidationError {
    if errors.is_empty() {
        return ValidationError::new(Field::FullName, "Validation failed");
    }
    errors.swap_remove(0)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        validate_address, validate_date_of_birth, validate_email, validate_full_name,
        validate_phone, FieldValidator,
    };
    use crate::domain::registration::{Field, PatchDraft, RegistrationDraft};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).expect("valid date")
    }

    fn alice() -> RegistrationDraft {
        RegistrationDraft {
            full_name: Some("  Alice Smith ".to_string()),
            email: Some("alice@test.com".to_string()),
            phone: Some("555-123-4567".to_string()),
            date_of_birth: Some("1990-05-15".to_string()),
            address: None,
        }
    }

    #[test]
    fn full_name_is_trimmed_and_length_checked() {
        assert_eq!(validate_full_name("  Alice Smith ").as_deref(), Ok("Alice Smith"));
        assert_eq!(
            validate_full_name("   ").map_err(|error| error.reason),
            Err("Full name cannot be empty".to_string())
        );
        assert_eq!(
            validate_full_name(" A ").map_err(|error| error.reason),
            Err("Full name must be at least 2 characters long".to_string())
        );
        assert!(validate_full_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn email_keeps_case_and_rejects_bad_syntax() {
        assert_eq!(validate_email("Alice.Smith@Test.com").as_deref(), Ok("Alice.Smith@Test.com"));
        for bad in ["alice", "alice@", "@test.com", "alice@test", "a b@test.com", "alice@@test.com"]
        {
            let error = validate_email(bad).expect_err("should reject malformed email");
            assert_eq!(error.field, Field::Email, "{bad}");
        }
    }

    #[test]
    fn phone_separators_normalize_to_same_digits() {
        let variants = ["555-123-4567", "(555) 123 4567", "555.123.4567", " 555 123-4567 ", "5551234567"];
        for variant in variants {
            assert_eq!(validate_phone(variant).as_deref(), Ok("5551234567"), "{variant}");
        }
        assert_eq!(validate_phone("+91 91234 56789").as_deref(), Ok("+919123456789"));
    }

    #[test]
    fn phone_rejects_wrong_length_and_letters() {
        for bad in ["555-1234", "1234567890123456", "555-ABC-4567", "++5551234567", "555+1234567"] {
            let error = validate_phone(bad).expect_err("should reject phone");
            assert_eq!(error.field, Field::Phone, "{bad}");
        }
    }

    #[test]
    fn date_of_birth_must_be_strictly_past() {
        assert!(validate_date_of_birth("2026-10-15", today()).is_err());
        assert!(validate_date_of_birth("2030-01-01", today()).is_err());
        assert_eq!(
            validate_date_of_birth("2026-10-14", today()),
            Ok(NaiveDate::from_ymd_opt(2026, 10, 14).expect("valid date"))
        );
    }

    #[test]
    fn date_of_birth_rejects_malformed_and_ancient_dates() {
        let malformed = validate_date_of_birth("15/05/1990", today()).expect_err("malformed");
        assert!(malformed.reason.contains("YYYY-MM-DD"));

        assert!(validate_date_of_birth("1876-10-15", today()).is_ok());
        assert!(validate_date_of_birth("1876-10-16", today()).is_ok());
        let too_old = validate_date_of_birth("1875-10-14", today()).expect_err("age > 150");
        assert!(too_old.reason.contains("age > 150"));
    }

    #[test]
    fn address_passes_through_including_empty() {
        assert_eq!(validate_address(Some("")), Ok(Some(String::new())));
        assert_eq!(validate_address(None), Ok(None));
        assert!(validate_address(Some(&"a".repeat(501))).is_err());
    }

    #[test]
    fn validate_new_normalizes_every_field() {
        let record = FieldValidator::as_of(today()).validate_new(&alice()).expect("valid draft");

        assert_eq!(record.full_name, "Alice Smith");
        assert_eq!(record.phone, "5551234567");
        assert_eq!(record.date_of_birth, NaiveDate::from_ymd_opt(1990, 5, 15).expect("date"));
    }

    #[test]
    fn validate_new_reports_every_failing_field() {
        let draft = RegistrationDraft {
            email: Some("nope".to_string()),
            phone: Some("12".to_string()),
            ..alice()
        };
        let errors = FieldValidator::as_of(today()).validate_new(&draft).expect_err("invalid");
        let fields: Vec<Field> = errors.iter().map(|error| error.field).collect();

        assert_eq!(fields, vec![Field::Email, Field::Phone]);
    }

    #[test]
    fn future_date_of_birth_fails_even_with_other_fields_valid() {
        let draft = RegistrationDraft { date_of_birth: Some("2027-01-01".to_string()), ..alice() };
        let error = FieldValidator::as_of(today()).validate_new_first(&draft).expect_err("future");

        assert_eq!(error.field, Field::DateOfBirth);
    }

    #[test]
    fn validate_patch_checks_only_present_fields() {
        let patch = FieldValidator::as_of(today())
            .validate_patch(&PatchDraft {
                phone: Some("(555) 987-6543".to_string()),
                ..PatchDraft::default()
            })
            .expect("valid patch");

        assert_eq!(patch.phone.as_deref(), Some("5559876543"));
        assert!(patch.full_name.is_none());
        assert!(patch.email.is_none());
    }
}
