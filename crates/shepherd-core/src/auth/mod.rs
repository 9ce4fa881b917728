//! Sign-in state for the staff member running the tool.
//!
//! - `Session`: the OAuth access token plus identity, persisted in the cache
//!   directory and valid for 60 minutes
//! - `CredentialStore`: optional keychain storage of the token via keyring

pub mod credentials;
pub mod session;

pub use credentials::CredentialStore;
pub use session::{Session, SessionData};
