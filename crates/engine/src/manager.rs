//! Space manager.
//!
//! Registry of every open space, keyed by name. Metadata for all spaces
//! lives in one JSON document (`spaces.json`) under the instance base
//! directory, rewritten atomically on every mutation. Each space gets its
//! own subdirectory for engine files.
//!
//! At startup every listed space is opened eagerly; a space that fails to
//! open is logged and skipped so the rest of the instance still serves.

use crate::atomic_write;
use axon_core::error::{Error, Result};
use axon_core::{EngineKind, SpaceMeta};
use axon_storage::KvEngine;
use axon_vector::VectorEngine;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const META_FILE: &str = "spaces.json";

/// One open space: a tagged variant over the two engine kinds
pub enum Space {
    /// Ordered key-value engine
    Kv(KvEngine),
    /// ANN vector engine
    Vector(VectorEngine),
}

impl Space {
    /// The key-value engine, or an error for vector spaces
    pub fn as_kv(&self, name: &str) -> Result<&KvEngine> {
        match self {
            Space::Kv(engine) => Ok(engine),
            Space::Vector(_) => Err(Error::InvalidInput(format!(
                "space {} is not a key-value space",
                name
            ))),
        }
    }

    /// The vector engine, or an error for key-value spaces
    pub fn as_vector(&self, name: &str) -> Result<&VectorEngine> {
        match self {
            Space::Vector(engine) => Ok(engine),
            Space::Kv(_) => Err(Error::InvalidInput(format!(
                "space {} is not a vector space",
                name
            ))),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Space::Kv(engine) => engine.close(),
            Space::Vector(engine) => engine.close(),
        }
    }
}

struct Registry {
    spaces: HashMap<String, Arc<Space>>,
    metas: HashMap<String, SpaceMeta>,
}

/// Owner of all space lifecycles for one instance
pub struct SpaceManager {
    base: PathBuf,
    registry: RwLock<Registry>,
}

impl SpaceManager {
    /// Open the manager, loading metadata and eagerly opening every listed
    /// space. Spaces that fail to open are skipped with an error log.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base)?;

        let meta_path = base.join(META_FILE);
        let metas: Vec<SpaceMeta> = if meta_path.exists() {
            serde_json::from_slice(&std::fs::read(&meta_path)?)?
        } else {
            Vec::new()
        };

        let mut registry = Registry {
            spaces: HashMap::new(),
            metas: HashMap::new(),
        };
        for meta in metas {
            match open_space(&base, &meta) {
                Ok(space) => {
                    registry.spaces.insert(meta.name.clone(), Arc::new(space));
                    registry.metas.insert(meta.name.clone(), meta);
                }
                Err(e) => {
                    error!(space = %meta.name, "failed to open space, skipping: {}", e);
                }
            }
        }
        info!(spaces = registry.spaces.len(), "space manager open");

        Ok(SpaceManager {
            base,
            registry: RwLock::new(registry),
        })
    }

    /// Look up an open space.
    pub fn get_space(&self, name: &str) -> Result<Arc<Space>> {
        self.registry
            .read()
            .spaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SpaceNotFound(name.to_string()))
    }

    /// Verify a space exists; the current space is client-side state, so
    /// this is all a `USE_SPACE` needs.
    pub fn use_space(&self, name: &str) -> Result<()> {
        if self.registry.read().spaces.contains_key(name) {
            Ok(())
        } else {
            Err(Error::SpaceNotFound(name.to_string()))
        }
    }

    /// Create a space: validate parameters, build the engine under its own
    /// subdirectory, register it and persist metadata.
    pub fn create_space(&self, meta: SpaceMeta) -> Result<()> {
        meta.validate()?;

        let mut registry = self.registry.write();
        if registry.spaces.contains_key(&meta.name) {
            return Err(Error::SpaceExists(meta.name));
        }
        let space = open_space(&self.base, &meta)?;
        registry.spaces.insert(meta.name.clone(), Arc::new(space));
        registry.metas.insert(meta.name.clone(), meta);
        self.persist(&registry)?;
        Ok(())
    }

    /// Delete a space: close the engine, remove its directory tree and
    /// update metadata.
    pub fn delete_space(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let space = registry
            .spaces
            .remove(name)
            .ok_or_else(|| Error::SpaceNotFound(name.to_string()))?;
        registry.metas.remove(name);
        if let Err(e) = space.close() {
            warn!(space = name, "error closing space during delete: {}", e);
        }
        let dir = self.base.join(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.persist(&registry)?;
        Ok(())
    }

    /// Names of all open spaces, sorted.
    pub fn list_spaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().spaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata for one space.
    pub fn space_meta(&self, name: &str) -> Result<SpaceMeta> {
        self.registry
            .read()
            .metas
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SpaceNotFound(name.to_string()))
    }

    /// Close every open space. Errors are logged, not propagated, so one
    /// bad engine doesn't block shutdown of the rest.
    pub fn close_all(&self) {
        let mut registry = self.registry.write();
        for (name, space) in registry.spaces.drain() {
            if let Err(e) = space.close() {
                warn!(space = %name, "error closing space: {}", e);
            }
        }
    }

    fn persist(&self, registry: &Registry) -> Result<()> {
        let mut metas: Vec<&SpaceMeta> = registry.metas.values().collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        let json = serde_json::to_vec_pretty(&metas)?;
        atomic_write(&self.base.join(META_FILE), &json)
    }
}

fn open_space(base: &Path, meta: &SpaceMeta) -> Result<Space> {
    let dir = base.join(&meta.name);
    match meta.engine_kind {
        EngineKind::KeyValue => Ok(Space::Kv(KvEngine::open(dir, meta.wal_enabled)?)),
        EngineKind::Vector => {
            let dim = meta
                .dim
                .ok_or_else(|| Error::InvalidInput("vector space requires a dimension".into()))?;
            let descriptor = meta.descriptor()?;
            let metric = meta
                .metric
                .ok_or_else(|| Error::InvalidInput("vector space requires a metric".into()))?;
            Ok(Space::Vector(VectorEngine::open(
                dir,
                dim,
                descriptor,
                metric,
                meta.wal_enabled,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_core::DistanceMetric;
    use tempfile::TempDir;

    #[test]
    fn test_create_get_list() {
        let dir = TempDir::new().unwrap();
        let manager = SpaceManager::open(dir.path()).unwrap();

        manager
            .create_space(SpaceMeta::key_value("orders", true))
            .unwrap();
        manager
            .create_space(SpaceMeta::vector(
                "embeddings",
                8,
                "Flat",
                DistanceMetric::L2,
                false,
            ))
            .unwrap();

        assert_eq!(manager.list_spaces(), vec!["embeddings", "orders"]);
        assert!(manager.use_space("orders").is_ok());
        assert!(matches!(
            manager.use_space("nope"),
            Err(Error::SpaceNotFound(_))
        ));

        let space = manager.get_space("orders").unwrap();
        space.as_kv("orders").unwrap().put("k", "v").unwrap();
        assert!(space.as_vector("orders").is_err());

        manager.close_all();
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = SpaceManager::open(dir.path()).unwrap();
        manager
            .create_space(SpaceMeta::key_value("s", true))
            .unwrap();
        assert!(matches!(
            manager.create_space(SpaceMeta::key_value("s", true)),
            Err(Error::SpaceExists(_))
        ));
        manager.close_all();
    }

    #[test]
    fn test_invalid_vector_params_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = SpaceManager::open(dir.path()).unwrap();
        let meta = SpaceMeta::vector("v", 0, "Flat", DistanceMetric::L2, false);
        assert!(manager.create_space(meta).is_err());
        let meta = SpaceMeta::vector("v", 8, "HNSW3", DistanceMetric::L2, false);
        assert!(manager.create_space(meta).is_err());
        manager.close_all();
    }

    #[test]
    fn test_reopen_restores_spaces() {
        let dir = TempDir::new().unwrap();
        {
            let manager = SpaceManager::open(dir.path()).unwrap();
            manager
                .create_space(SpaceMeta::key_value("kv1", true))
                .unwrap();
            manager
                .create_space(SpaceMeta::vector(
                    "vec1",
                    4,
                    "Flat",
                    DistanceMetric::L2,
                    false,
                ))
                .unwrap();
            let space = manager.get_space("kv1").unwrap();
            space.as_kv("kv1").unwrap().put("k", "v").unwrap();
            manager.close_all();
        }

        let manager = SpaceManager::open(dir.path()).unwrap();
        assert_eq!(manager.list_spaces(), vec!["kv1", "vec1"]);
        let space = manager.get_space("kv1").unwrap();
        assert_eq!(space.as_kv("kv1").unwrap().get("k").unwrap(), "v");

        let meta = manager.space_meta("vec1").unwrap();
        assert_eq!(meta.dim, Some(4));
        assert_eq!(meta.metric, Some(DistanceMetric::L2));
        manager.close_all();
    }

    #[test]
    fn test_delete_space_removes_directory() {
        let dir = TempDir::new().unwrap();
        let manager = SpaceManager::open(dir.path()).unwrap();
        manager
            .create_space(SpaceMeta::key_value("gone", true))
            .unwrap();
        assert!(dir.path().join("gone").exists());

        manager.delete_space("gone").unwrap();
        assert!(!dir.path().join("gone").exists());
        assert!(manager.get_space("gone").is_err());
        assert!(matches!(
            manager.delete_space("gone"),
            Err(Error::SpaceNotFound(_))
        ));
        manager.close_all();
    }

    #[test]
    fn test_broken_space_is_skipped_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let manager = SpaceManager::open(dir.path()).unwrap();
            manager
                .create_space(SpaceMeta::key_value("good", true))
                .unwrap();
            manager
                .create_space(SpaceMeta::key_value("bad", true))
                .unwrap();
            manager.close_all();
        }
        // Corrupt the bad space's index header
        std::fs::write(dir.path().join("bad").join("index.dat"), b"garbage!")
            .unwrap();

        let manager = SpaceManager::open(dir.path()).unwrap();
        assert_eq!(manager.list_spaces(), vec!["good"]);
        manager.close_all();
    }
}
