//! On-disk proving key cache with single-flight loading.
//!
//! Keys live on a mounted volume under
//! `<keys_dir>/<circuit_type>/<circuit_version>.vkey` and are provisioned by
//! the deployment; the manager never writes, deletes or rotates them. A key
//! is loaded on first demand and cached for the process lifetime. The
//! configured circuit set is small and fixed per deployment, so there is no
//! eviction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::info;
use zkrelay_types::{CircuitType, KeyHandle, unix_ms};

use crate::metrics;

/// A proving key load failure.
///
/// Never cached: a failed flight is cleared, so the next `resolve` for the
/// same pair retries the load. The failure may be transient (the volume may
/// not be populated yet at startup).
#[derive(Debug, Error)]
pub(crate) enum KeyLoadError {
    /// No key file at the expected path.
    #[error("proving key not found at {}", path.display())]
    NotFound {
        /// Expected key file path.
        path: PathBuf,
    },
    /// The key file exists but holds no bytes.
    #[error("proving key at {} is empty", path.display())]
    Empty {
        /// Offending key file path.
        path: PathBuf,
    },
    /// The key file could not be read.
    #[error("failed to read proving key at {}: {source}", path.display())]
    Io {
        /// Offending key file path.
        path: PathBuf,
        /// Underlying filesystem error.
        source: std::io::Error,
    },
}

type KeyId = (CircuitType, String);
type LoadResult = Result<Arc<KeyHandle>, Arc<KeyLoadError>>;

/// One cache slot: a resolved key, or an in-flight load whose result every
/// waiter subscribes to.
enum KeySlot {
    Loaded(Arc<KeyHandle>),
    Loading(watch::Receiver<Option<LoadResult>>),
}

/// What a `resolve` call found in the slot map.
enum Role {
    Load(watch::Sender<Option<LoadResult>>),
    Wait(watch::Receiver<Option<LoadResult>>),
}

/// Lazily loads and caches proving keys per (circuit_type, circuit_version).
///
/// Concurrent `resolve` calls for the same pair coalesce onto a single load:
/// the first caller performs the disk read and broadcasts the result, success
/// or failure alike, to every waiter of that flight. A successful load stays
/// cached; a failed flight is cleared so the next `resolve` retries.
pub(crate) struct KeyManager {
    keys_dir: PathBuf,
    slots: Mutex<HashMap<KeyId, KeySlot>>,
}

impl KeyManager {
    /// Creates a manager rooted at the mounted key directory.
    pub(crate) fn new(keys_dir: PathBuf) -> Self {
        Self {
            keys_dir,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached key for the pair, loading it from disk on first
    /// demand.
    pub(crate) async fn resolve(
        &self,
        circuit_type: CircuitType,
        circuit_version: &str,
    ) -> LoadResult {
        let id = (circuit_type, circuit_version.to_string());
        loop {
            let role = {
                let mut slots = self.slots.lock().await;
                match slots.get(&id) {
                    Some(KeySlot::Loaded(handle)) => return Ok(handle.clone()),
                    Some(KeySlot::Loading(rx)) => Role::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(id.clone(), KeySlot::Loading(rx));
                        Role::Load(tx)
                    }
                }
            };

            match role {
                Role::Load(tx) => {
                    let result = self
                        .load(circuit_type, circuit_version)
                        .await
                        .map_err(Arc::new);
                    {
                        let mut slots = self.slots.lock().await;
                        match &result {
                            Ok(handle) => {
                                slots.insert(id, KeySlot::Loaded(handle.clone()));
                            }
                            Err(_) => {
                                slots.remove(&id);
                            }
                        }
                    }
                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
                Role::Wait(mut rx) => {
                    let outcome = loop {
                        if let Some(result) = rx.borrow_and_update().clone() {
                            break Some(result);
                        }
                        if rx.changed().await.is_err() {
                            break None;
                        }
                    };
                    match outcome {
                        Some(result) => return result,
                        None => {
                            // The loader was cancelled before publishing a
                            // result. Clear the stale flight and start over.
                            let mut slots = self.slots.lock().await;
                            if let Some(KeySlot::Loading(stale)) = slots.get(&id) {
                                if stale.same_channel(&rx) {
                                    slots.remove(&id);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Number of keys currently cached.
    pub(crate) async fn loaded(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| matches!(slot, KeySlot::Loaded(_)))
            .count()
    }

    async fn load(
        &self,
        circuit_type: CircuitType,
        circuit_version: &str,
    ) -> Result<Arc<KeyHandle>, KeyLoadError> {
        let path = self
            .keys_dir
            .join(circuit_type.to_string())
            .join(format!("{circuit_version}.vkey"));

        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                KeyLoadError::NotFound { path: path.clone() }
            } else {
                KeyLoadError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        if bytes.is_empty() {
            return Err(KeyLoadError::Empty { path });
        }

        info!(%circuit_type, circuit_version, bytes = bytes.len(), "loaded proving key");
        metrics::key_loaded();

        Ok(Arc::new(KeyHandle {
            circuit_type,
            circuit_version: circuit_version.to_string(),
            bytes,
            loaded_at: unix_ms(),
        }))
    }
}
