// ABOUTME: Headless browser discovery for the big-export pipeline
// ABOUTME: Searches a configured path, platform install locations and PATH for Chrome/Chromium

use crate::errors::BrowserError;
use log::{debug, info};
use std::env;
use std::path::{Path, PathBuf};

/// Finds a Chrome-compatible executable on the host.
#[derive(Debug, Clone)]
pub struct BrowserLocator {
    configured: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    names: Vec<String>,
}

impl Default for BrowserLocator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BrowserLocator {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            candidates: platform_candidates(),
            names: path_names().iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A locator that only considers the given locations, in order.
    pub fn with_search(configured: Option<PathBuf>, candidates: Vec<PathBuf>, names: Vec<String>) -> Self {
        Self {
            configured,
            candidates,
            names,
        }
    }

    /// Return the first candidate that exists and is executable.
    pub fn find(&self) -> Result<PathBuf, BrowserError> {
        if let Some(path) = &self.configured {
            if is_executable(path) {
                info!("Using configured browser: {:?}", path);
                return Ok(path.clone());
            }
            debug!("Configured browser path is not executable: {:?}", path);
        }

        for candidate in &self.candidates {
            if is_executable(candidate) {
                info!("Found browser at {:?}", candidate);
                return Ok(candidate.clone());
            }
        }

        if let Some(path_var) = env::var_os("PATH") {
            for dir in env::split_paths(&path_var) {
                for name in &self.names {
                    let candidate = dir.join(name);
                    if is_executable(&candidate) {
                        info!("Found browser on PATH: {:?}", candidate);
                        return Ok(candidate);
                    }
                }
            }
        }

        Err(BrowserError::NotFound(
            "no Chrome/Chromium installation found; set BROWSER_PATH".to_string(),
        ))
    }
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(target_os = "macos")]
fn platform_candidates() -> Vec<PathBuf> {
    [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(target_os = "windows")]
fn platform_candidates() -> Vec<PathBuf> {
    [
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_candidates() -> Vec<PathBuf> {
    [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/opt/google/chrome/chrome",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(target_os = "windows")]
fn path_names() -> &'static [&'static str] {
    &["chrome.exe", "msedge.exe", "chromium.exe"]
}

#[cfg(not(target_os = "windows"))]
fn path_names() -> &'static [&'static str] {
    &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "chrome",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_nothing_found() {
        let locator = BrowserLocator::with_search(None, vec![], vec![]);
        assert!(matches!(locator.find(), Err(BrowserError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_configured_path_wins_and_needs_execute_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("Failed to create temp dir");
        let plain = dir.path().join("not-a-browser");
        let exe = dir.path().join("chrome");
        std::fs::write(&plain, "").expect("Failed to write file");
        std::fs::write(&exe, "#!/bin/sh\n").expect("Failed to write file");
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod");

        let locator = BrowserLocator::with_search(Some(exe.clone()), vec![plain.clone()], vec![]);
        assert_eq!(locator.find().unwrap(), exe);

        let locator = BrowserLocator::with_search(Some(plain.clone()), vec![exe.clone()], vec![]);
        assert_eq!(locator.find().unwrap(), exe);

        let locator = BrowserLocator::with_search(None, vec![plain], vec![]);
        assert!(locator.find().is_err());
    }
}
