/// Captured task output
///
/// Everything dispatched tasks print is collected here and, on request or
/// on failure, written to a single log file.
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Output;

const STDOUT_HEADER: &str = "****STDOUT****";
const STDERR_HEADER: &str = "****STDERR****";

#[derive(Debug, Default, Clone)]
pub struct RunLog {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, output: &Output) {
        self.write_stdout(&output.stdout);
        self.write_stderr(&output.stderr);
    }

    pub fn write_stdout(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
    }

    pub fn write_stderr(&mut self, bytes: &[u8]) {
        self.stderr.extend_from_slice(bytes);
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            STDOUT_HEADER,
            String::from_utf8_lossy(&self.stdout).trim_end(),
            STDERR_HEADER,
            String::from_utf8_lossy(&self.stderr).trim_end()
        )
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write log file: {}", path.display()))
    }
}

/// Default name for the log written when a run fails without `--log`
pub fn failure_log_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("stitches.grass-{}.log", now.format("%H_%M_%S_%6f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_blocks() {
        let mut log = RunLog::new();
        log.write_stdout(b"hello\n");
        log.write_stderr(b"WARNING: careful\n");

        assert_eq!(
            log.render(),
            "****STDOUT****\nhello\n****STDERR****\nWARNING: careful\n"
        );
    }

    #[test]
    fn test_write_to_creates_parent() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("logs/run.log");
        let mut log = RunLog::new();
        log.write_stdout(b"x");
        log.write_to(&path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with(STDOUT_HEADER));
    }

    #[test]
    fn test_failure_log_name() {
        let now = chrono::Local
            .with_ymd_and_hms(2024, 3, 1, 9, 5, 7)
            .unwrap();
        assert_eq!(failure_log_name(now), "stitches.grass-09_05_07_000000.log");
    }
}
