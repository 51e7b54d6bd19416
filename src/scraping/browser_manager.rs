//! Browser discovery and launch using `chromiumoxide`.
//!
//! One visible (or headless) Chromium-family browser per run, with a
//! persistent profile directory that is wiped at start.

use std::path::Path;

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::config::BrowserCrawlConfig;
use crate::core::error::{HarvestError, HarvestResult};

// ── Executable discovery ─────────────────────────────────────────────────────

const PATH_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "brave-browser",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
#[cfg(target_os = "linux")]
const INSTALL_PATHS: &[&str] = &["/usr/bin/google-chrome", "/usr/bin/chromium", "/snap/bin/chromium"];
#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];
#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[];

/// Locate a Chromium-family executable: the configured path if it exists,
/// then the first match on `PATH`, then well-known install locations.
pub fn find_chrome_executable(explicit: Option<&str>) -> Option<String> {
    if let Some(configured) = explicit {
        if Path::new(configured).is_file() {
            return Some(configured.to_string());
        }
        warn!("configured browser {} not found, searching instead", configured);
    }

    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    });
    if let Some(found) = on_path {
        return Some(found.to_string_lossy().into_owned());
    }

    INSTALL_PATHS
        .iter()
        .find(|p| Path::new(p).is_file())
        .map(|p| p.to_string())
}

// ── Launch ───────────────────────────────────────────────────────────────────

/// Build the launch config: fixed viewport, automation flag suppressed,
/// persistent profile in `cfg.user_data_dir`.
pub fn build_browser_config(exe: &str, cfg: &BrowserCrawlConfig) -> HarvestResult<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(&cfg.user_data_dir)
        .viewport(Viewport {
            width: cfg.viewport_width,
            height: cfg.viewport_height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(cfg.viewport_width, cfg.viewport_height)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");

    if !cfg.headless {
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| HarvestError::Browser(format!("invalid launch options: {}", e)))
}

/// Recreate the profile directory so every run starts clean.
pub fn reset_profile_dir(dir: &Path) -> HarvestResult<()> {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("could not clear profile {}: {}", dir.display(), e);
        }
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Launch the browser and spawn its CDP event handler.
pub async fn launch_browser(
    cfg: &BrowserCrawlConfig,
    explicit_exe: Option<&str>,
) -> HarvestResult<(Browser, JoinHandle<()>)> {
    let exe = find_chrome_executable(explicit_exe).ok_or_else(|| {
        HarvestError::Browser("no browser found; install Chrome or Chromium, or set CHROME_EXECUTABLE".into())
    })?;

    reset_profile_dir(&cfg.user_data_dir)?;

    info!(
        "🌐 Launching browser ({}, {})",
        exe,
        if cfg.headless { "headless" } else { "headed" }
    );
    let config = build_browser_config(&exe, cfg)?;
    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| HarvestError::Browser(format!("could not start {}: {}", exe, e)))?;

    let events = tokio::spawn(async move {
        while let Some(step) = handler.next().await {
            if let Err(err) = step {
                warn!("browser event loop: {}", err);
            }
        }
    });

    Ok((browser, events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_executable_must_exist() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(find_chrome_executable(Some(&path)), Some(path));
    }

    #[tokio::test]
    async fn launch_without_a_browser_is_a_browser_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BrowserCrawlConfig {
            user_data_dir: dir.path().join("profile"),
            ..BrowserCrawlConfig::default()
        };
        let missing = dir.path().join("no-such-chrome");
        // Only meaningful where no system browser is installed.
        if find_chrome_executable(missing.to_str()).is_some() {
            return;
        }
        let err = launch_browser(&cfg, missing.to_str()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Browser(_)), "got {err:?}");
    }

    #[test]
    fn profile_dir_is_recreated_empty() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        std::fs::write(profile.join("Cookies"), "stale").unwrap();

        reset_profile_dir(&profile).unwrap();
        assert!(profile.exists());
        assert_eq!(std::fs::read_dir(&profile).unwrap().count(), 0);
    }
}
