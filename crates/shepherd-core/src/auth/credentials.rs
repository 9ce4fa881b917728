use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "shepherd";

/// Remembered access tokens in the OS keychain, keyed by account email
pub struct CredentialStore;

impl CredentialStore {
    pub fn store(email: &str, access_token: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .set_password(access_token)
            .context("Failed to store access token in keychain")?;
        Ok(())
    }

    pub fn get_token(email: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve access token from keychain")
    }

    pub fn delete(email: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete access token from keychain"),
        }
    }

    pub fn has_token(email: &str) -> bool {
        Entry::new(SERVICE_NAME, email)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }
}
