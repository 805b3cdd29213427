//! The external GIS workspace a pipeline runs against.
//!
//! A [`Scope`] names one mapset (database/location/mapset). It is passed
//! explicitly through flattening, evaluation and dispatch; nothing reads the
//! "current" mapset from ambient state.

pub mod grass;
pub mod memory;

pub use grass::GrassWorkspace;
pub use memory::MemoryWorkspace;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_MAPSET: &str = "PERMANENT";

/// Fully resolved workspace coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub database: String,
    pub location: String,
    pub mapset: String,
}

impl Scope {
    pub fn new(
        database: impl Into<String>,
        location: impl Into<String>,
        mapset: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            location: location.into(),
            mapset: mapset.into(),
        }
    }

    pub fn location_path(&self) -> PathBuf {
        PathBuf::from(&self.database).join(&self.location)
    }

    pub fn mapset_path(&self) -> PathBuf {
        self.location_path().join(&self.mapset)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.database, self.location, self.mapset)
    }
}

/// Map types the toolkit stores inside a mapset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Vector,
    Raster,
}

impl MapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapKind::Vector => "vector",
            MapKind::Raster => "raster",
        }
    }
}

/// Region settings as reported by the toolkit (e.g. `n`, `s`, `ewres`, `projection`)
pub type Region = BTreeMap<String, String>;

/// Stateful toolkit session operations the engine needs
pub trait Workspace {
    /// Make sure the mapset exists, creating location and mapset if needed.
    fn ensure_mapset(&self, scope: &Scope) -> Result<()>;

    /// Whether `name` of `kind` exists in the mapset named by `scope`
    fn map_exists(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<bool>;

    /// Active computational region for `scope`
    fn region(&self, scope: &Scope) -> Result<Region>;

    /// Delete a map from the mapset named by `scope`
    fn remove_map(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_paths() {
        let scope = Scope::new("/data/grass", "nz", "soils");
        assert_eq!(scope.location_path(), PathBuf::from("/data/grass/nz"));
        assert_eq!(scope.mapset_path(), PathBuf::from("/data/grass/nz/soils"));
        assert_eq!(scope.to_string(), "/data/grass/nz/soils");
    }
}
