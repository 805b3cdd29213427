/// In-memory workspace
///
/// Keeps maps and regions in process memory. Used by tests and by embedders
/// that drive the engine without a GRASS installation.
use anyhow::Result;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use super::{MapKind, Region, Scope, Workspace};

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    maps: RefCell<BTreeSet<(Scope, MapKind, String)>>,
    regions: RefCell<BTreeMap<Scope, Region>>,
    mapsets: RefCell<BTreeSet<Scope>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_map(&self, kind: MapKind, name: &str, scope: &Scope) {
        self.maps
            .borrow_mut()
            .insert((scope.clone(), kind, name.to_string()));
    }

    pub fn delete_map(&self, kind: MapKind, name: &str, scope: &Scope) -> bool {
        self.maps
            .borrow_mut()
            .remove(&(scope.clone(), kind, name.to_string()))
    }

    pub fn has_map(&self, kind: MapKind, name: &str, scope: &Scope) -> bool {
        self.maps
            .borrow()
            .contains(&(scope.clone(), kind, name.to_string()))
    }

    pub fn set_region(&self, scope: &Scope, key: &str, value: &str) {
        self.regions
            .borrow_mut()
            .entry(scope.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn has_mapset(&self, scope: &Scope) -> bool {
        self.mapsets.borrow().contains(scope)
    }
}

impl Workspace for MemoryWorkspace {
    fn ensure_mapset(&self, scope: &Scope) -> Result<()> {
        self.mapsets.borrow_mut().insert(scope.clone());
        Ok(())
    }

    fn map_exists(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<bool> {
        Ok(self.has_map(kind, name, scope))
    }

    fn region(&self, scope: &Scope) -> Result<Region> {
        Ok(self
            .regions
            .borrow()
            .get(scope)
            .cloned()
            .unwrap_or_default())
    }

    fn remove_map(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<()> {
        if !self.delete_map(kind, name, scope) {
            anyhow::bail!("Map {}/{}@{} does not exist", kind.as_str(), name, scope);
        }
        Ok(())
    }
}
