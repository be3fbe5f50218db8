use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use cbf_common::{CbfError, CubeId, FragmentId, Result};

/// Storage abstraction executing opaque transforms against stored fragments.
///
/// Implementations are backend-specific; the engine never inspects fragment
/// contents, it only asks for "execute this transform against this fragment,
/// producing that fragment" and "delete this fragment".
pub trait FragmentStore: Send + Sync {
    /// Apply `transform` to `src`, materializing the result as `dst`.
    ///
    /// # Errors
    /// Returns an error when `src` does not exist or the backend rejects the
    /// transform.
    fn transform(&self, src: FragmentId, transform: &str, dst: FragmentId) -> Result<()>;

    /// Delete a stored fragment.
    fn delete(&self, id: FragmentId) -> Result<()>;

    /// Whether a fragment currently exists.
    fn contains(&self, id: FragmentId) -> bool;
}

/// In-memory fragment store with injectable failures, used by tests and
/// local runs.
#[derive(Debug, Default)]
pub struct MemFragmentStore {
    fragments: RwLock<HashMap<FragmentId, Vec<u8>>>,
    fail_on: RwLock<HashSet<FragmentId>>,
}

impl MemFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one fragment per index of `indices` for `cube`.
    pub fn seed_cube(&self, cube: CubeId, indices: impl IntoIterator<Item = u64>) {
        let mut fragments = self.fragments.write().expect("store lock poisoned");
        for index in indices {
            let id = FragmentId { cube, index };
            fragments.insert(id, format!("fragment {id}").into_bytes());
        }
    }

    /// Make any transform producing `id` fail, for rollback tests.
    pub fn fail_fragment(&self, id: FragmentId) {
        self.fail_on.write().expect("store lock poisoned").insert(id);
    }

    /// Number of stored fragments belonging to `cube`.
    pub fn cube_fragment_count(&self, cube: CubeId) -> usize {
        self.fragments
            .read()
            .expect("store lock poisoned")
            .keys()
            .filter(|id| id.cube == cube)
            .count()
    }
}

impl FragmentStore for MemFragmentStore {
    fn transform(&self, src: FragmentId, transform: &str, dst: FragmentId) -> Result<()> {
        if self.fail_on.read().expect("store lock poisoned").contains(&dst) {
            return Err(CbfError::Execution(format!(
                "injected transform failure for {dst}"
            )));
        }
        let mut fragments = self.fragments.write().expect("store lock poisoned");
        let payload = fragments
            .get(&src)
            .cloned()
            .ok_or_else(|| CbfError::Execution(format!("unknown source fragment: {src}")))?;
        let mut out = transform.as_bytes().to_vec();
        out.extend_from_slice(&payload);
        fragments.insert(dst, out);
        Ok(())
    }

    fn delete(&self, id: FragmentId) -> Result<()> {
        self.fragments
            .write()
            .expect("store lock poisoned")
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CbfError::Execution(format!("unknown fragment: {id}")))
    }

    fn contains(&self, id: FragmentId) -> bool {
        self.fragments
            .read()
            .expect("store lock poisoned")
            .contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_copies_source_payload() {
        let store = MemFragmentStore::new();
        let cube = CubeId(1);
        store.seed_cube(cube, [1, 2]);
        let dst = FragmentId {
            cube: CubeId(2),
            index: 1,
        };
        store
            .transform(FragmentId { cube, index: 1 }, "copy", dst)
            .expect("transform");
        assert!(store.contains(dst));
    }

    #[test]
    fn injected_failure_surfaces_as_execution_error() {
        let store = MemFragmentStore::new();
        let cube = CubeId(1);
        store.seed_cube(cube, [1]);
        let dst = FragmentId {
            cube: CubeId(2),
            index: 1,
        };
        store.fail_fragment(dst);
        let err = store
            .transform(FragmentId { cube, index: 1 }, "copy", dst)
            .expect_err("must fail");
        assert!(matches!(err, CbfError::Execution(_)));
    }
}
