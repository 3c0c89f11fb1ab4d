use std::path::PathBuf;
use std::sync::OnceLock;

static TRACKER_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the tracker home directory (`~/.deploy-tracker/`).
/// Supports `$DEPLOY_TRACKER_HOME` env override. Cached via `OnceLock`.
pub fn tracker_home() -> &'static PathBuf {
    TRACKER_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("DEPLOY_TRACKER_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deploy-tracker")
    })
}

/// `~/.deploy-tracker/config/`
pub fn config_dir() -> PathBuf {
    tracker_home().join("config")
}

/// `~/.deploy-tracker/logs/`
pub fn logs_dir() -> PathBuf {
    tracker_home().join("logs")
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
