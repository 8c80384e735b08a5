use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Interprets `raw` as a primary key. Returns `None` for anything that is not a UUID.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FullName,
    Email,
    Phone,
    DateOfBirth,
    Address,
}

impl Field {
    pub const ALL: [Field; 5] =
        [Field::FullName, Field::Email, Field::Phone, Field::DateOfBirth, Field::Address];

    /// Fields a create request cannot go without.
    pub const REQUIRED: [Field; 4] =
        [Field::FullName, Field::Email, Field::Phone, Field::DateOfBirth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullName => "full_name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::DateOfBirth => "date_of_birth",
            Self::Address => "address",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FullName => "full name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::DateOfBirth => "date of birth",
            Self::Address => "address",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    pub fn new(fields: NewRegistration, id: RegistrationId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            full_name: fields.full_name,
            email: fields.email,
            phone: fields.phone,
            date_of_birth: fields.date_of_birth,
            address: fields.address,
            created_at,
        }
    }

    /// Applies only the fields present in `patch`. `id` and `created_at` are never touched.
    pub fn apply(&mut self, patch: &RegistrationPatch) {
        if let Some(full_name) = &patch.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(phone) = &patch.phone {
            self.phone = phone.clone();
        }
        if let Some(date_of_birth) = patch.date_of_birth {
            self.date_of_birth = date_of_birth;
        }
        if let Some(address) = &patch.address {
            self.address = Some(address.clone());
        }
    }
}

/// Create fields that already passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRegistration {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
}

/// Validated partial update. `None` means "leave as is".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
}

impl RegistrationPatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.address.is_none()
    }
}

/// Raw create input, exactly as the caller supplied it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl RegistrationDraft {
    pub fn value(&self, field: Field) -> Option<&str> {
        match field {
            Field::FullName => self.full_name.as_deref(),
            Field::Email => self.email.as_deref(),
            Field::Phone => self.phone.as_deref(),
            Field::DateOfBirth => self.date_of_birth.as_deref(),
            Field::Address => self.address.as_deref(),
        }
    }

    /// Required fields that are absent or blank, in declaration order.
    pub fn missing_required(&self) -> Vec<Field> {
        Field::REQUIRED
            .into_iter()
            .filter(|field| self.value(*field).map(str::trim).unwrap_or_default().is_empty())
            .collect()
    }
}

/// Raw partial update input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDraft {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl PatchDraft {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.address.is_none()
    }

    /// Drops blank values. Conversational updates treat an empty string as "not provided".
    pub fn without_blank_values(self) -> Self {
        let keep = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        Self {
            full_name: keep(self.full_name),
            email: keep(self.email),
            phone: keep(self.phone),
            date_of_birth: keep(self.date_of_birth),
            address: keep(self.address),
        }
    }
}
