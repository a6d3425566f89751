pub mod client;
pub mod token;
pub mod types;

pub use client::{HttpRegistryClient, RegistryClient, RegistryConnection, RegistryError};
pub use token::{TokenError, TokenProvider};
pub use types::{Project, Subject, SubjectStatus};
