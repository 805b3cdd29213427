use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{HashMethod, DEFAULT_STATE_FILE};
use crate::config_expansion::expand_env_vars;

pub const CONFIG_FILE_NAME: &str = "stitches.toml";

/// Complete Stitches configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StitchesConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub grass: GrassConfig,
}

/// Default scope for pipelines that don't name one
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkspaceConfig {
    /// GRASS database directory; relative paths are resolved against the
    /// directory holding the config file
    #[serde(default, alias = "gisdbase")]
    pub database: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub mapset: Option<String>,

    /// CRS used when a missing location has to be created (e.g. "EPSG:2193")
    #[serde(default)]
    pub crs: Option<String>,
}

/// Fingerprint state settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    /// File name of the state document inside the root mapset
    #[serde(default = "default_state_file")]
    pub file_name: String,

    /// How file resources are compared: mtime, content
    #[serde(default)]
    pub hash: HashMethod,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file_name: default_state_file(),
            hash: HashMethod::default(),
        }
    }
}

/// GRASS launcher settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GrassConfig {
    /// Launcher binary name or path; GRASSBIN takes precedence
    #[serde(default)]
    pub binary: Option<String>,

    /// Version suffixes probed as `grass<version>` when no binary is set
    #[serde(default)]
    pub versions: Vec<String>,
}

fn default_state_file() -> String {
    DEFAULT_STATE_FILE.to_string()
}

/// Discovers `stitches.toml` by traversing up the directory tree, falling
/// back to `~/.config/stitches/config.toml`
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    let found = start_dir
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file());
    if found.is_some() {
        return found;
    }

    dirs::home_dir()
        .map(|home| home.join(".config/stitches/config.toml"))
        .filter(|global| global.is_file())
}

impl StitchesConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(dir) = path.parent() {
            config.resolve_relative(dir);
        }

        Ok(config)
    }

    /// Parse configuration text after environment expansion
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: StitchesConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit file if given, otherwise the discovered one, otherwise defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let cwd = std::env::current_dir()
            .context("Failed to get current directory for config discovery")?;
        match discover_config(&cwd) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using discovered config");
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    fn resolve_relative(&mut self, base: &Path) {
        if let Some(database) = &self.workspace.database {
            let path = Path::new(database);
            if path.is_relative() {
                self.workspace.database = Some(base.join(path).to_string_lossy().into_owned());
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let name = &self.state.file_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            anyhow::bail!("state.file_name must be a plain file name: {:?}", name);
        }

        if let Some(mapset) = &self.workspace.mapset {
            if mapset.is_empty() || mapset.contains('/') {
                anyhow::bail!("workspace.mapset must be a single path component");
            }
        }

        Ok(())
    }

    /// Example configuration as TOML string
    pub fn example() -> Result<String> {
        let config = StitchesConfig {
            workspace: WorkspaceConfig {
                database: Some("grassdata".to_string()),
                location: Some("nz".to_string()),
                mapset: Some("PERMANENT".to_string()),
                crs: Some("EPSG:2193".to_string()),
            },
            state: StateConfig::default(),
            grass: GrassConfig {
                binary: None,
                versions: vec!["84".to_string(), "83".to_string()],
            },
        };

        toml::to_string_pretty(&config).context("Failed to render example config")
    }
}
