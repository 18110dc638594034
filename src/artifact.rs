//! Ephemeral storage for generated images.
//!
//! Every artifact lives in a slot keyed by a random 128-bit hex id. Slots move
//! `Pending -> Available -> Expired` and are dropped from the index once deleted;
//! lookups for anything that is not `Available` are indistinguishable from ids
//! that were never issued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::utils::ids::{is_hex_id, random_hex_id};
use crate::{PortraitError, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Accepts only ids in the shape this store issues.
    pub fn parse(raw: &str) -> Option<Self> {
        is_hex_id(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Pending,
    Available,
    Expired,
}

#[derive(Clone, Debug)]
pub struct Artifact {
    pub id: ArtifactId,
    pub bytes: Bytes,
    pub content_type: String,
    pub created_at: u64,
}

impl Artifact {
    pub fn file_extension(&self) -> &'static str {
        extension_for(&self.content_type)
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}

#[derive(Debug, Clone)]
enum Backing {
    Memory,
    Directory(PathBuf),
}

#[derive(Debug)]
struct Slot {
    state: ArtifactState,
    content_type: String,
    created_at: u64,
    bytes: Option<Bytes>,
}

pub struct ArtifactStore {
    backing: Backing,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<ArtifactId, Slot>>,
}

impl ArtifactStore {
    pub fn in_memory() -> Self {
        Self::with_backing(Backing::Memory, Arc::new(SystemClock))
    }

    /// Opens a directory-backed store, creating the directory and clearing
    /// artifacts left behind by a previous process.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let removed = purge_leftovers(&dir).await?;
        if removed > 0 {
            tracing::info!(dir = %dir.display(), removed, "cleared stale artifacts");
        }
        Ok(Self::with_backing(
            Backing::Directory(dir),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn with_backing(backing: Backing, clock: Arc<dyn Clock>) -> Self {
        Self {
            backing,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory => None,
            Backing::Directory(dir) => Some(dir.as_path()),
        }
    }

    pub async fn put(&self, bytes: Bytes, content_type: &str) -> Result<ArtifactId> {
        let content_type = normalize_content_type(content_type);
        let created_at = self.clock.now_epoch_seconds();

        let id = {
            let mut slots = self.lock_slots();
            let id = loop {
                let id = ArtifactId(random_hex_id()?);
                if !slots.contains_key(&id) {
                    break id;
                }
            };
            slots.insert(
                id.clone(),
                Slot {
                    state: ArtifactState::Pending,
                    content_type: content_type.clone(),
                    created_at,
                    bytes: None,
                },
            );
            id
        };

        let in_memory = match &self.backing {
            Backing::Memory => Some(bytes),
            Backing::Directory(dir) => {
                let path = artifact_path(dir, &id, &content_type);
                if let Err(err) = tokio::fs::write(&path, &bytes).await {
                    self.lock_slots().remove(&id);
                    return Err(err.into());
                }
                None
            }
        };

        let mut slots = self.lock_slots();
        match slots.get_mut(&id) {
            Some(slot) if slot.state == ArtifactState::Pending => {
                slot.bytes = in_memory;
                slot.state = ArtifactState::Available;
                Ok(id)
            }
            _ => Err(PortraitError::Internal(format!(
                "artifact {id} vanished while being written"
            ))),
        }
    }

    /// Returns `ArtifactNotFound` for malformed, pending, expired, and unknown ids alike.
    pub async fn get(&self, raw_id: &str) -> Result<Artifact> {
        let id = ArtifactId::parse(raw_id).ok_or(PortraitError::ArtifactNotFound)?;

        let (content_type, created_at, in_memory) = {
            let slots = self.lock_slots();
            let slot = slots
                .get(&id)
                .filter(|slot| slot.state == ArtifactState::Available)
                .ok_or(PortraitError::ArtifactNotFound)?;
            (slot.content_type.clone(), slot.created_at, slot.bytes.clone())
        };

        let bytes = match (&self.backing, in_memory) {
            (Backing::Memory, Some(bytes)) => bytes,
            (Backing::Memory, None) => return Err(PortraitError::ArtifactNotFound),
            (Backing::Directory(dir), _) => {
                let path = artifact_path(dir, &id, &content_type);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        return Err(PortraitError::ArtifactNotFound);
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        Ok(Artifact {
            id,
            bytes,
            content_type,
            created_at,
        })
    }

    /// Idempotent: unknown ids and repeated deletes are no-ops.
    pub async fn delete(&self, id: &ArtifactId) {
        let content_type = {
            let mut slots = self.lock_slots();
            match slots.get_mut(id) {
                Some(slot) if slot.state != ArtifactState::Expired => {
                    slot.state = ArtifactState::Expired;
                    slot.bytes = None;
                    slot.content_type.clone()
                }
                _ => return,
            }
        };

        if let Backing::Directory(dir) = &self.backing {
            let path = artifact_path(dir, id, &content_type);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(artifact_id = %id, error = %err, "failed to remove artifact file");
                }
            }
        }

        self.lock_slots().remove(id);
    }

    pub fn state(&self, id: &ArtifactId) -> Option<ArtifactState> {
        self.lock_slots().get(id).map(|slot| slot.state)
    }

    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| slot.state == ArtifactState::Available)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("backing", &self.backing)
            .field("available", &self.len())
            .finish()
    }
}

fn normalize_content_type(content_type: &str) -> String {
    let content_type = content_type.trim().to_ascii_lowercase();
    if content_type.starts_with("image/") {
        content_type
    } else {
        DEFAULT_CONTENT_TYPE.to_string()
    }
}

fn artifact_path(dir: &Path, id: &ArtifactId, content_type: &str) -> PathBuf {
    dir.join(format!("{id}.{}", extension_for(content_type)))
}

async fn purge_leftovers(dir: &Path) -> Result<usize> {
    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_ours = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(is_hex_id);
        if !is_ours || !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_round_trip_then_delete_twice() {
        let store = ArtifactStore::in_memory();
        let id = store
            .put(Bytes::from_static(b"portrait"), "image/png")
            .await
            .unwrap();

        let artifact = store.get(id.as_str()).await.unwrap();
        assert_eq!(artifact.bytes.as_ref(), b"portrait");
        assert_eq!(artifact.content_type, "image/png");
        assert_eq!(artifact.file_extension(), "png");
        assert_eq!(store.state(&id), Some(ArtifactState::Available));

        store.delete(&id).await;
        store.delete(&id).await;
        assert!(matches!(
            store.get(id.as_str()).await,
            Err(PortraitError::ArtifactNotFound)
        ));
        assert_eq!(store.state(&id), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids_are_not_found() {
        let store = ArtifactStore::in_memory();
        let unissued = "0".repeat(32);
        for raw in ["", "../secret", "not-hex", unissued.as_str()] {
            assert!(matches!(
                store.get(raw).await,
                Err(PortraitError::ArtifactNotFound)
            ));
        }
        let never_issued = ArtifactId::parse(&"a".repeat(32)).unwrap();
        store.delete(&never_issued).await;
    }

    #[tokio::test]
    async fn non_image_content_type_is_stored_as_jpeg() {
        let store = ArtifactStore::in_memory();
        let id = store
            .put(Bytes::from_static(b"x"), "application/octet-stream")
            .await
            .unwrap();
        let artifact = store.get(id.as_str()).await.unwrap();
        assert_eq!(artifact.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(artifact.file_extension(), "jpg");
    }

    #[tokio::test]
    async fn directory_store_writes_and_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open_dir(dir.path()).await.unwrap();

        let id = store
            .put(Bytes::from_static(b"jpeg-bytes"), "image/jpeg")
            .await
            .unwrap();
        let path = dir.path().join(format!("{id}.jpg"));
        assert!(path.exists());
        assert_eq!(
            store.get(id.as_str()).await.unwrap().bytes.as_ref(),
            b"jpeg-bytes"
        );

        store.delete(&id).await;
        assert!(!path.exists());
        store.delete(&id).await;
        assert!(matches!(
            store.get(id.as_str()).await,
            Err(PortraitError::ArtifactNotFound)
        ));
    }

    #[tokio::test]
    async fn directory_file_removed_out_of_band_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open_dir(dir.path()).await.unwrap();
        let id = store
            .put(Bytes::from_static(b"x"), "image/webp")
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join(format!("{id}.webp"))).unwrap();
        assert!(matches!(
            store.get(id.as_str()).await,
            Err(PortraitError::ArtifactNotFound)
        ));
    }

    #[tokio::test]
    async fn open_dir_clears_only_leftover_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{}.jpg", "b".repeat(32)));
        let unrelated = dir.path().join("index.html");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&unrelated, b"<html>").unwrap();

        let store = ArtifactStore::open_dir(dir.path()).await.unwrap();
        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert!(store.is_empty());
        assert_eq!(store.directory(), Some(dir.path()));
    }
}
