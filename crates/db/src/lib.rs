pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use repositories::{
    InMemoryRegistrationRepository, RegistrationRepository, RepositoryError,
    SqlRegistrationRepository,
};
pub use store::{RegistrationStore, StoreError};
