use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use connector_protocol::{Protocol, WalletId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A site the user approved for one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    pub url: String,
    pub protocol: Protocol,
    pub wallet_id: WalletId,
    pub auth_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhitelistEvent {
    Revoked { url: String, protocol: Protocol },
}

/// Approved sites, at most one entry per (url, protocol).
///
/// Optionally mirrored to a JSON file. The in-memory list is authoritative;
/// a failed write is logged and otherwise ignored.
pub struct Whitelist {
    entries: RwLock<Vec<WhitelistEntry>>,
    path: Option<PathBuf>,
    /// Serializes file writes; the snapshot is taken while holding it.
    persist_lock: Mutex<()>,
    events: broadcast::Sender<WhitelistEvent>,
}

impl Whitelist {
    pub fn in_memory() -> Self {
        Self::with_entries(Vec::new(), None)
    }

    fn with_entries(entries: Vec<WhitelistEntry>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(entries),
            path,
            persist_lock: Mutex::new(()),
            events,
        }
    }

    /// Load from `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .context(format!("Failed to read whitelist: {}", path.display()))?;
            serde_json::from_str(&content).context("Failed to parse whitelist")?
        } else {
            Vec::new()
        };
        tracing::info!("Whitelist loaded: {} entries", entries.len());
        Ok(Self::with_entries(entries, Some(path)))
    }

    pub fn is_whitelisted(&self, url: &str, protocol: Protocol) -> Option<WhitelistEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.url == url && entry.protocol == protocol)
            .cloned()
    }

    /// Insert or replace the entry for (url, protocol).
    pub fn upsert(&self, entry: WhitelistEntry) {
        {
            let mut entries = self.entries.write();
            match entries
                .iter_mut()
                .find(|known| known.url == entry.url && known.protocol == entry.protocol)
            {
                Some(known) => *known = entry.clone(),
                None => entries.push(entry.clone()),
            }
        }
        tracing::info!(url = %entry.url, protocol = %entry.protocol, wallet_id = entry.wallet_id, "site whitelisted");
        self.persist();
    }

    /// Remove the entry and notify listeners. Returns `false` if there was none.
    pub fn revoke(&self, url: &str, protocol: Protocol) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|entry| !(entry.url == url && entry.protocol == protocol));
            entries.len() != before
        };
        if !removed {
            return false;
        }

        tracing::info!(%url, %protocol, "site access revoked");
        self.persist();
        // no receivers just means no live sessions
        let _ = self.events.send(WhitelistEvent::Revoked {
            url: url.to_string(),
            protocol,
        });
        true
    }

    pub fn list(&self) -> Vec<WhitelistEntry> {
        self.entries.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WhitelistEvent> {
        self.events.subscribe()
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let _writing = self.persist_lock.lock();
        let snapshot = self.entries.read().clone();

        let result = serde_json::to_vec_pretty(&snapshot)
            .context("Failed to encode whitelist")
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, bytes).context(format!("Failed to write {}", path.display()))
            });
        if let Err(e) = result {
            tracing::warn!("Whitelist not persisted: {:#}", e);
        }
    }
}
