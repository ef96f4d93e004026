// Authentication module
// Credential and target context storage, token lifecycle, account management

pub mod account;
mod manager;
pub mod storage;
mod store;
mod types;

pub use manager::{SessionManager, SessionSettings};
pub use storage::{StoredSession, TokenFile};
pub use store::{ContextLease, CredentialStore, TargetContext};
pub use types::{Credential, LoginCredentials, OAuthClient, TokenResponse};
