// Token store module
// Durable persistence of the token pair; every write is all-or-neither

mod sqlite;

pub use sqlite::SqliteVault;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// The persisted credential pair.
///
/// Access and refresh token are written and cleared together; no reader ever
/// observes one without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Persistence backend for the token pair.
///
/// The concrete key-value store is owned by the embedding application; this
/// trait is the seam it plugs into. Implementations must make `write` atomic
/// with respect to `read` so a torn pair is never visible.
pub trait TokenVault: Send + Sync {
    fn write(&self, record: &TokenPair) -> Result<()>;
    fn read(&self) -> Result<Option<TokenPair>>;
    fn erase(&self) -> Result<()>;
}

/// In-memory vault for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryVault {
    record: Mutex<Option<TokenPair>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenVault for MemoryVault {
    fn write(&self, record: &TokenPair) -> Result<()> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;
        *slot = Some(record.clone());
        Ok(())
    }

    fn read(&self) -> Result<Option<TokenPair>> {
        let slot = self
            .record
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;
        Ok(slot.clone())
    }

    fn erase(&self) -> Result<()> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| anyhow!("token vault lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Token store over a pluggable vault backend
pub struct TokenStore {
    vault: Box<dyn TokenVault>,
}

impl TokenStore {
    pub fn new(vault: Box<dyn TokenVault>) -> Self {
        Self { vault }
    }

    /// Persist a fresh token pair as one record. The expiry instant is
    /// computed here from the server-supplied lifetime.
    pub fn save(&self, access_token: &str, refresh_token: &str, expires_in_secs: u64) -> Result<()> {
        let record = TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs as i64),
        };
        self.vault.write(&record)?;
        tracing::debug!(expires_at = %record.expires_at.to_rfc3339(), "token pair persisted");
        Ok(())
    }

    /// Load the stored pair; both tokens or neither.
    pub fn load(&self) -> Result<Option<TokenPair>> {
        self.vault.read()
    }

    /// Convenience read of the access token alone
    pub fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.map(|pair| pair.access_token))
    }

    /// Remove the stored pair. Subsequent loads return None.
    pub fn clear(&self) -> Result<()> {
        self.vault.erase()?;
        tracing::info!("stored session cleared");
        Ok(())
    }

    /// True iff a complete pair is present
    pub fn is_logged_in(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }
}
