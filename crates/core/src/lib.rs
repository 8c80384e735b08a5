pub mod config;
pub mod domain;
pub mod errors;
pub mod placeholder;
pub mod validation;

pub use domain::registration::{
    Field, NewRegistration, PatchDraft, Registration, RegistrationDraft, RegistrationId,
    RegistrationPatch,
};
pub use errors::{
    relay_text, ApplicationError, DomainError, InterfaceError, RELAY_MARKER,
};
pub use placeholder::PlaceholderDetector;
pub use validation::{FieldValidator, ValidationError};
