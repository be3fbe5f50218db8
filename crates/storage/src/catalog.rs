use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use cbf_common::{CbfError, ContainerId, CubeId, FragmentId, Result};
use serde::{Deserialize, Serialize};

/// One datacube record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeRow {
    /// Stable cube id.
    pub id: CubeId,
    /// Owning container.
    pub container: ContainerId,
    /// Encoded fragment range set covering every stored fragment.
    pub fragment_set: String,
    /// Persistent identifier, present once the cube is published.
    pub pid: Option<String>,
}

/// One fragment metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRow {
    /// Caller-supplied fragment identifier.
    pub id: FragmentId,
    /// Owning datacube.
    pub cube: CubeId,
    /// 1-based relative index within the cube.
    pub relative_index: u64,
}

/// Catalog contract required by the engine.
///
/// The engine reads a cube's encoded fragment set, inserts new fragment rows
/// keyed by caller-supplied identifiers, deletes rows by identifier or by
/// owning cube, and publishes the persistent identifier on commit. Only the
/// group leader ever writes cube-level records.
pub trait CatalogStore: Send + Sync {
    /// Fetch the encoded fragment range set for an existing cube.
    fn fragment_set(&self, cube: CubeId) -> Result<String>;

    /// Fetch a cube record.
    fn cube(&self, cube: CubeId) -> Result<CubeRow>;

    /// Create a container and return its id.
    fn create_container(&self, name: &str) -> Result<ContainerId>;

    /// Create a cube record inside `container` covering `fragment_set`.
    fn create_cube(&self, container: ContainerId, fragment_set: &str) -> Result<CubeId>;

    /// Insert fragment rows; one sequential call per process after its worker
    /// threads have joined.
    fn insert_fragments(&self, rows: Vec<FragmentRow>) -> Result<()>;

    /// Fragment rows currently recorded for a cube.
    fn fragments_of(&self, cube: CubeId) -> Result<Vec<FragmentRow>>;

    /// Delete fragment rows by identifier. Missing rows are not an error so
    /// compensation stays idempotent.
    fn delete_fragments(&self, ids: &[FragmentId]) -> Result<()>;

    /// Delete a cube record and any fragment rows still owned by it.
    fn delete_cube(&self, cube: CubeId) -> Result<()>;

    /// Remove a container when no cube references it. Returns whether the
    /// container was removed.
    fn remove_container_if_empty(&self, container: ContainerId) -> Result<bool>;

    /// Publish the persistent identifier for a finished cube.
    fn publish_pid(&self, cube: CubeId, pid: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct CatalogState {
    containers: HashMap<ContainerId, String>,
    cubes: HashMap<CubeId, CubeRow>,
    fragments: HashMap<FragmentId, FragmentRow>,
}

/// In-memory catalog used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemCatalog {
    state: RwLock<CatalogState>,
    next_container: AtomicU64,
    next_cube: AtomicU64,
}

/// Seed record for loading a catalog from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeSeed {
    /// Container name the cube is created in.
    pub container: String,
    /// Encoded fragment range set.
    pub fragment_set: String,
}

impl MemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load cube seeds from a JSON file and create the corresponding records.
    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let seeds: Vec<CubeSeed> =
            serde_json::from_str(&s).map_err(|e| CbfError::InvalidConfig(e.to_string()))?;
        let catalog = MemCatalog::new();
        let mut containers: HashMap<String, ContainerId> = HashMap::new();
        for seed in seeds {
            let container = match containers.get(&seed.container) {
                Some(id) => *id,
                None => {
                    let id = catalog.create_container(&seed.container)?;
                    containers.insert(seed.container.clone(), id);
                    id
                }
            };
            catalog.create_cube(container, &seed.fragment_set)?;
        }
        Ok(catalog)
    }

    /// All cube records in id order.
    pub fn cubes(&self) -> Vec<CubeRow> {
        let mut rows: Vec<CubeRow> = self.read().cubes.values().cloned().collect();
        rows.sort_by_key(|c| c.id);
        rows
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().expect("catalog lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().expect("catalog lock poisoned")
    }
}

impl CatalogStore for MemCatalog {
    fn fragment_set(&self, cube: CubeId) -> Result<String> {
        self.read()
            .cubes
            .get(&cube)
            .map(|c| c.fragment_set.clone())
            .ok_or_else(|| CbfError::Execution(format!("unknown cube: {cube}")))
    }

    fn cube(&self, cube: CubeId) -> Result<CubeRow> {
        self.read()
            .cubes
            .get(&cube)
            .cloned()
            .ok_or_else(|| CbfError::Execution(format!("unknown cube: {cube}")))
    }

    fn create_container(&self, name: &str) -> Result<ContainerId> {
        let id = ContainerId(self.next_container.fetch_add(1, Ordering::Relaxed) + 1);
        self.write().containers.insert(id, name.to_string());
        Ok(id)
    }

    fn create_cube(&self, container: ContainerId, fragment_set: &str) -> Result<CubeId> {
        let mut state = self.write();
        if !state.containers.contains_key(&container) {
            return Err(CbfError::Execution(format!(
                "unknown container: {container}"
            )));
        }
        let id = CubeId(self.next_cube.fetch_add(1, Ordering::Relaxed) + 1);
        state.cubes.insert(
            id,
            CubeRow {
                id,
                container,
                fragment_set: fragment_set.to_string(),
                pid: None,
            },
        );
        Ok(id)
    }

    fn insert_fragments(&self, rows: Vec<FragmentRow>) -> Result<()> {
        let mut state = self.write();
        for row in rows {
            if !state.cubes.contains_key(&row.cube) {
                return Err(CbfError::Execution(format!(
                    "fragment insert for unknown cube: {}",
                    row.cube
                )));
            }
            state.fragments.insert(row.id, row);
        }
        Ok(())
    }

    fn fragments_of(&self, cube: CubeId) -> Result<Vec<FragmentRow>> {
        let mut rows: Vec<FragmentRow> = self
            .read()
            .fragments
            .values()
            .filter(|f| f.cube == cube)
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.relative_index);
        Ok(rows)
    }

    fn delete_fragments(&self, ids: &[FragmentId]) -> Result<()> {
        let mut state = self.write();
        for id in ids {
            state.fragments.remove(id);
        }
        Ok(())
    }

    fn delete_cube(&self, cube: CubeId) -> Result<()> {
        let mut state = self.write();
        state.fragments.retain(|_, f| f.cube != cube);
        state
            .cubes
            .remove(&cube)
            .map(|_| ())
            .ok_or_else(|| CbfError::Execution(format!("unknown cube: {cube}")))
    }

    fn remove_container_if_empty(&self, container: ContainerId) -> Result<bool> {
        let mut state = self.write();
        if state.cubes.values().any(|c| c.container == container) {
            return Ok(false);
        }
        Ok(state.containers.remove(&container).is_some())
    }

    fn publish_pid(&self, cube: CubeId, pid: &str) -> Result<()> {
        let mut state = self.write();
        let row = state
            .cubes
            .get_mut(&cube)
            .ok_or_else(|| CbfError::Execution(format!("unknown cube: {cube}")))?;
        row.pid = Some(pid.to_string());
        Ok(())
    }
}
