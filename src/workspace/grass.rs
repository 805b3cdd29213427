/// GRASS GIS workspace adapter
///
/// Every operation runs the GRASS launcher non-interactively against the
/// mapset named by the scope (`grass <mapset> --exec <module> ...`).
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use super::{MapKind, Region, Scope, Workspace};
use crate::config::GrassConfig;

/// Launcher names probed when no binary is configured
const DEFAULT_VERSIONS: &[&str] = &["", "84", "83", "82", "78", "76", "74"];

#[derive(Debug, Clone)]
pub struct GrassWorkspace {
    binary: PathBuf,
    crs: Option<String>,
}

impl GrassWorkspace {
    pub fn new(binary: PathBuf, crs: Option<String>) -> Self {
        Self { binary, crs }
    }

    /// Locate the GRASS launcher
    ///
    /// Resolution order: `GRASSBIN`, `[grass] binary`, then `grass{version}`
    /// for each configured (or default) version found in PATH.
    pub fn locate(config: &GrassConfig, crs: Option<String>) -> Result<Self> {
        if let Ok(bin) = std::env::var("GRASSBIN") {
            return Ok(Self::new(PathBuf::from(bin), crs));
        }

        if let Some(bin) = &config.binary {
            let path = which::which(bin).unwrap_or_else(|_| PathBuf::from(bin));
            return Ok(Self::new(path, crs));
        }

        let versions: Vec<String> = if config.versions.is_empty() {
            DEFAULT_VERSIONS.iter().map(|v| v.to_string()).collect()
        } else {
            config.versions.clone()
        };

        for version in &versions {
            let candidate = format!("grass{}", version);
            if let Ok(path) = which::which(&candidate) {
                debug!(binary = %path.display(), "found GRASS launcher");
                return Ok(Self::new(path, crs));
            }
        }

        anyhow::bail!(
            "Cannot find the GRASS GIS binary (tried grass{{{}}}); set GRASSBIN or [grass] binary",
            versions.join(",")
        )
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run a module inside the mapset, capturing its output
    pub fn exec(&self, scope: &Scope, module: &str, args: &[String]) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(scope.mapset_path())
            .arg("--exec")
            .arg(module)
            .args(args)
            .env("GRASS_MESSAGE_FORMAT", "plain")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = ?cmd, "running GRASS module");

        cmd.output()
            .with_context(|| format!("Failed to spawn {}", self.binary.display()))
    }

    fn exec_checked(&self, scope: &Scope, module: &str, args: &[String]) -> Result<String> {
        let output = self.exec(scope, module, args)?;
        if !output.status.success() {
            anyhow::bail!(
                "{} failed in {}: {}",
                module,
                scope,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn create(&self, path: &Path, crs: Option<&str>) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c");
        if let Some(crs) = crs {
            cmd.arg(crs);
        }
        cmd.arg("-e").arg(path);

        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn {}", self.binary.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to create {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Parse `key=value` lines as printed by `g.region -g`
pub fn parse_region(output: &str) -> Region {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

impl Workspace for GrassWorkspace {
    fn ensure_mapset(&self, scope: &Scope) -> Result<()> {
        let location = scope.location_path();
        if !location.exists() {
            self.create(&location, self.crs.as_deref())?;
        }
        let mapset = scope.mapset_path();
        if !mapset.exists() {
            self.create(&mapset, None)?;
        }
        Ok(())
    }

    fn map_exists(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<bool> {
        if !scope.mapset_path().exists() {
            return Ok(false);
        }
        let stdout = self.exec_checked(
            scope,
            "g.list",
            &[
                format!("type={}", kind.as_str()),
                format!("pattern={}", name),
                format!("mapset={}", scope.mapset),
            ],
        )?;
        Ok(stdout.lines().next().map(str::trim) == Some(name))
    }

    fn region(&self, scope: &Scope) -> Result<Region> {
        let stdout = self.exec_checked(scope, "g.region", &["-g".to_string()])?;
        Ok(parse_region(&stdout))
    }

    fn remove_map(&self, kind: MapKind, name: &str, scope: &Scope) -> Result<()> {
        self.exec_checked(
            scope,
            "g.remove",
            &[
                "-f".to_string(),
                format!("type={}", kind.as_str()),
                format!("name={}", name),
            ],
        )
        .map(|_| ())
    }
}
