/// Resource references
///
/// A reference string has the form `<kind>/<locator>`:
/// - `file/relative/path`, `file//absolute/path`
/// - `vector/name`, `vector/name@mapset`, `vector/name@location/mapset`,
///   `vector/name@database/location/mapset` (same for `raster`)
///
/// Parsing is scope-free; [`ResourceRef::resolve`] fills missing map
/// qualifiers from the scope the task runs in, so two references name the
/// same resource iff their resolved keys are equal.
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::StitchesError;
use crate::workspace::{MapKind, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    File,
    Map(MapKind),
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Map(kind) => kind.as_str(),
        }
    }
}

/// A parsed but not yet resolved reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    raw: String,
    kind: ResourceKind,
    name: String,
    database: Option<String>,
    location: Option<String>,
    mapset: Option<String>,
}

impl ResourceRef {
    pub fn parse(reference: &str) -> Result<Self, StitchesError> {
        let (kind, rest) = reference
            .split_once('/')
            .ok_or_else(|| StitchesError::malformed(reference, "missing kind prefix"))?;

        let kind = match kind {
            "file" => ResourceKind::File,
            "vector" => ResourceKind::Map(MapKind::Vector),
            "raster" => ResourceKind::Map(MapKind::Raster),
            other => {
                return Err(StitchesError::malformed(
                    reference,
                    format!("unknown kind \"{}\" (expected file, vector or raster)", other),
                ))
            }
        };

        if rest.is_empty() {
            return Err(StitchesError::malformed(reference, "empty locator"));
        }

        if kind == ResourceKind::File {
            return Ok(Self {
                raw: reference.to_string(),
                kind,
                name: rest.to_string(),
                database: None,
                location: None,
                mapset: None,
            });
        }

        let (name, qualifier) = match rest.split_once('@') {
            Some((name, qualifier)) => (name, Some(qualifier)),
            None => (rest, None),
        };

        if name.is_empty() || name.contains('/') {
            return Err(StitchesError::malformed(reference, "invalid map name"));
        }

        let (mut database, mut location, mut mapset) = (None, None, None);
        if let Some(qualifier) = qualifier {
            // The database is a path, so only the last two components split off
            let parts: Vec<&str> = qualifier.rsplitn(3, '/').collect();
            if parts.iter().any(|p| p.is_empty() || p.contains('@')) {
                return Err(StitchesError::malformed(reference, "empty qualifier component"));
            }
            match parts.as_slice() {
                [m] => mapset = Some(m.to_string()),
                [m, l] => {
                    location = Some(l.to_string());
                    mapset = Some(m.to_string());
                }
                [m, l, d] => {
                    database = Some(d.to_string());
                    location = Some(l.to_string());
                    mapset = Some(m.to_string());
                }
                _ => {
                    return Err(StitchesError::malformed(
                        reference,
                        "qualifier must be mapset, location/mapset or database/location/mapset",
                    ))
                }
            }
        }

        Ok(Self {
            raw: reference.to_string(),
            kind,
            name: name.to_string(),
            database,
            location,
            mapset,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve against the task's scope (maps) or base directory (files)
    pub fn resolve(&self, scope: &Scope, base_dir: &Path) -> Resource {
        let locator = match self.kind {
            ResourceKind::File => {
                let path = Path::new(&self.name);
                let full = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base_dir.join(path)
                };
                Locator::File(normalize(&full))
            }
            ResourceKind::Map(_) => Locator::Map {
                name: self.name.clone(),
                scope: Scope {
                    database: self
                        .database
                        .clone()
                        .unwrap_or_else(|| scope.database.clone()),
                    location: self
                        .location
                        .clone()
                        .unwrap_or_else(|| scope.location.clone()),
                    mapset: self.mapset.clone().unwrap_or_else(|| scope.mapset.clone()),
                },
            },
        };

        Resource {
            reference: self.raw.clone(),
            kind: self.kind,
            locator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    File(PathBuf),
    Map { name: String, scope: Scope },
}

/// A fully resolved resource
#[derive(Debug, Clone)]
pub struct Resource {
    reference: String,
    kind: ResourceKind,
    locator: Locator,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The reference as written in the pipeline
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Canonical identity, e.g. `vector/roads@/data/nz/PERMANENT`
    pub fn key(&self) -> String {
        match &self.locator {
            Locator::File(path) => format!("file/{}", path.display()),
            Locator::Map { name, scope } => format!("{}/{}@{}", self.kind.as_str(), name, scope),
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self.kind, ResourceKind::Map(_))
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.locator == other.locator
    }
}

impl Eq for Resource {}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Lexically normalize `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("/grassdata", "nz", "PERMANENT")
    }

    #[test]
    fn test_parse_file_refs() {
        let r = ResourceRef::parse("file/foobar/baz.tif").unwrap();
        assert_eq!(r.kind(), ResourceKind::File);
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(res.locator(), &Locator::File(PathBuf::from("/work/foobar/baz.tif")));

        let r = ResourceRef::parse("file//foobar/baz.tif").unwrap();
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(res.locator(), &Locator::File(PathBuf::from("/foobar/baz.tif")));
    }

    #[test]
    fn test_parse_map_qualifiers() {
        let r = ResourceRef::parse("vector/mypoint@mydb/myloc/maps").unwrap();
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(
            res.locator(),
            &Locator::Map {
                name: "mypoint".into(),
                scope: Scope::new("mydb", "myloc", "maps"),
            }
        );

        let r = ResourceRef::parse("raster/dem@soils").unwrap();
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(res.key(), "raster/dem@/grassdata/nz/soils");

        let r = ResourceRef::parse("vector/roads@/data/grass db/other/soils").unwrap();
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(res.key(), "vector/roads@/data/grass db/other/soils");

        let r = ResourceRef::parse("vector/roads@other/soils").unwrap();
        let res = r.resolve(&scope(), Path::new("/work"));
        assert_eq!(res.key(), "vector/roads@/grassdata/other/soils");
    }

    #[test]
    fn test_bare_and_qualified_names_are_the_same_resource() {
        let base = Path::new("/work");
        let bare = ResourceRef::parse("vector/roads").unwrap().resolve(&scope(), base);
        let full = ResourceRef::parse("vector/roads@/grassdata/nz/PERMANENT")
            .unwrap()
            .resolve(&scope(), base);
        assert_eq!(bare, full);

        // A resolved key parses back to the same resource from any scope
        let elsewhere = Scope::new("/other", "world", "work");
        let reparsed = ResourceRef::parse(&bare.key())
            .unwrap()
            .resolve(&elsewhere, Path::new("/elsewhere"));
        assert_eq!(bare, reparsed);

        let by_mapset = ResourceRef::parse("vector/roads@PERMANENT")
            .unwrap()
            .resolve(&scope(), base);
        assert_eq!(bare, by_mapset);

        let raster = ResourceRef::parse("raster/roads").unwrap().resolve(&scope(), base);
        assert_ne!(bare, raster);
    }

    #[test]
    fn test_file_paths_normalize() {
        let a = ResourceRef::parse("file/./data/../data/a.tif")
            .unwrap()
            .resolve(&scope(), Path::new("/work"));
        let b = ResourceRef::parse("file/data/a.tif")
            .unwrap()
            .resolve(&scope(), Path::new("/work"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_refs() {
        for bad in [
            "roads",
            "polygon/roads",
            "vector/",
            "vector/@soils",
            "vector/roads@",
            "vector/roads@a//b",
            "vector/roads@/nz/PERMANENT",
            "vector/roads@a@b",
            "file/",
        ] {
            let err = ResourceRef::parse(bad).unwrap_err();
            assert!(
                matches!(err, StitchesError::MalformedReference { .. }),
                "{} should be malformed",
                bad
            );
        }
    }
}
