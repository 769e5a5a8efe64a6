//! The durable (L2) ticket tier.
//!
//! Tickets survive process restarts here so a restarted service does not ask
//! the authority for a ticket it already holds, which the authority would
//! refuse with an "already issued" fault.
//!
//! | Implementation | Backing | Use |
//! |----------------|---------|-----|
//! | [`FileTicketStore`] | one JSON file per ticket | production |
//! | [`MemoryTicketStore`] | `HashMap` | tests, L1-only deployments |

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use facturador_common_identity::TenantId;
use parking_lot::RwLock;
use tempfile::NamedTempFile;

use crate::{
    error::{TicketError, TicketResult},
    ticket::{TicketKey, TicketRecord},
};

const FILE_PREFIX: &str = "ta_";
const FILE_SUFFIX: &str = ".json";

/// Persistent ticket storage keyed by [`TicketKey`].
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Returns the stored record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] when the record exists but cannot be
    /// read or decoded.
    async fn load(&self, key: &TicketKey) -> TicketResult<Option<TicketRecord>>;

    /// Stores `record` under `key`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] if the write fails; the previous
    /// record, if any, is left intact.
    async fn save(&self, key: &TicketKey, record: &TicketRecord) -> TicketResult<()>;

    /// Removes the record for `key`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] if the record cannot be removed.
    async fn delete(&self, key: &TicketKey) -> TicketResult<bool>;

    /// Lists the keys of every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] if the listing fails.
    async fn keys(&self) -> TicketResult<Vec<TicketKey>>;
}

/// Stores each ticket as `ta_<tenant>_<service>.json` in one directory.
#[derive(Debug, Clone)]
pub struct FileTicketStore {
    dir: PathBuf,
}

impl FileTicketStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the record for `key`.
    #[must_use]
    pub fn record_path(&self, key: &TicketKey) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

fn file_name(key: &TicketKey) -> String {
    format!("{FILE_PREFIX}{}_{}{FILE_SUFFIX}", key.tenant_id(), key.service())
}

/// Recovers the key from a record file name; `None` for foreign files.
fn parse_file_name(name: &str) -> Option<TicketKey> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (tenant, service) = stem.split_once('_')?;
    let tenant: TenantId = tenant.parse().ok()?;
    TicketKey::new(tenant, service).ok()
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn load(&self, key: &TicketKey) -> TicketResult<Option<TicketRecord>> {
        let path = self.record_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(TicketError::storage(format!("read {}", path.display()), error));
            },
        };
        let record = serde_json::from_slice(&bytes)
            .map_err(|error| TicketError::storage(format!("decode {}", path.display()), error))?;
        Ok(Some(record))
    }

    async fn save(&self, key: &TicketKey, record: &TicketRecord) -> TicketResult<()> {
        let contents = serde_json::to_vec_pretty(record)
            .map_err(|error| TicketError::storage(format!("encode ticket {key}"), error))?;
        let dir = self.dir.clone();
        let name = file_name(key);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &name, &contents))
            .await
            .map_err(|error| TicketError::storage("ticket write task failed", error))?
    }

    async fn delete(&self, key: &TicketKey) -> TicketResult<bool> {
        let path = self.record_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(TicketError::storage(format!("remove {}", path.display()), error)),
        }
    }

    async fn keys(&self) -> TicketResult<Vec<TicketKey>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(TicketError::storage(format!("list {}", self.dir.display()), error));
            },
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|error| TicketError::storage(format!("list {}", self.dir.display()), error))?
        {
            if let Some(key) = entry.file_name().to_str().and_then(parse_file_name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> TicketResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|error| TicketError::storage(format!("create {}", dir.display()), error))?;
    let mut file = NamedTempFile::new_in(dir)
        .map_err(|error| TicketError::storage(format!("create temporary file for {name}"), error))?;
    file.write_all(contents)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|error| TicketError::storage(format!("write {name}"), error))?;
    file.persist(dir.join(name))
        .map_err(|error| TicketError::storage(format!("replace {name}"), error.error))?;
    Ok(())
}

/// In-memory [`TicketStore`].
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    records: RwLock<HashMap<TicketKey, TicketRecord>>,
}

impl MemoryTicketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn load(&self, key: &TicketKey) -> TicketResult<Option<TicketRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn save(&self, key: &TicketKey, record: &TicketRecord) -> TicketResult<()> {
        self.records.write().insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &TicketKey) -> TicketResult<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    async fn keys(&self) -> TicketResult<Vec<TicketKey>> {
        let mut keys: Vec<TicketKey> = self.records.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
