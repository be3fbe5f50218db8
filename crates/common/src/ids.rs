//! Typed identifiers shared across engine/storage components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable datacube identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CubeId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for CubeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable container identifier grouping related datacubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fragment identifier: the owning cube plus the fragment's 1-based relative
/// index inside it.
///
/// Workers derive these deterministically from their partition slice, so new
/// rows can be keyed without any id-allocation round trip to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    /// Owning datacube.
    pub cube: CubeId,
    /// 1-based relative index within the cube.
    pub index: u64,
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cube, self.index)
    }
}
