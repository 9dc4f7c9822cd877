use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{CtrlError, CtrlResult};

/// Name of the environment variable containing the path to the configuration file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/hyctrl/config.toml` or `$HOME/.config/hyctrl/config.toml`
///  (2) on Windows: `%APPDATA%\hyctrl\config.toml`
pub const ENV_CONFIG_PATH: &str = "HYCTRL_CONFIG_PATH";

/// Tunables of an automaton-construction session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatonConfig {
    /// Number of workers used by [`Automaton::initialise`](crate::automaton::Automaton::initialise).
    /// `0` selects the available parallelism of the host.
    pub worker_threads: usize,

    /// Maximum number of frames visited by
    /// [`Automaton::explore`](crate::automaton::Automaton::explore). Recursive procedures can
    /// generate an unbounded frame space, in which case exploration must be cut off.
    pub exploration_limit: Option<usize>,

    /// Whether term-level exploration unfolds procedure calls into their bodies.
    pub nested_exploration: bool,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            exploration_limit: Some(1 << 20),
            nested_exploration: true,
        }
    }
}

impl AutomatonConfig {
    /// Number of workers to spawn for `jobs` independent jobs.
    pub fn effective_workers(&self, jobs: usize) -> usize {
        let wanted = if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.worker_threads
        };
        wanted.min(jobs).max(1)
    }

    /// Get the default path to the configuration file.
    pub fn default_path() -> PathBuf {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push("hyctrl");
        path.push("config.toml");
        path
    }

    /// Load a configuration from a TOML file. Missing keys take their default value.
    pub fn load_from_toml(path: &Path) -> CtrlResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&toml_str).map_err(|e| match e {
            CtrlError::ConfigParseError { source, .. } => CtrlError::ConfigParseError {
                source,
                file: path.display().to_string(),
            },
            e => e,
        })
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(toml_str: &str) -> CtrlResult<Self> {
        toml::from_str(toml_str).map_err(|source| CtrlError::ConfigParseError {
            source,
            file: "<string>".to_string(),
        })
    }

    /// Save the configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_toml(&self, path: &Path) -> CtrlResult<()> {
        let toml_str = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let conf = AutomatonConfig::from_toml_str("worker_threads = 3\n").unwrap();
        assert_eq!(conf.worker_threads, 3);
        assert_eq!(
            conf.exploration_limit,
            AutomatonConfig::default().exploration_limit
        );
        assert!(conf.nested_exploration);
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = AutomatonConfig::from_toml_str("worker_threads = \"many\"").unwrap_err();
        assert!(matches!(err, CtrlError::ConfigParseError { .. }));
    }

    #[test]
    fn toml_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("hyctrl-conf-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");
        let conf = AutomatonConfig {
            worker_threads: 2,
            exploration_limit: Some(4096),
            nested_exploration: false,
        };
        conf.save_to_toml(&path).unwrap();
        assert_eq!(AutomatonConfig::load_from_toml(&path).unwrap(), conf);

        std::fs::write(&path, "exploration_limit = \"none\"").unwrap();
        let err = AutomatonConfig::load_from_toml(&path).unwrap_err();
        assert!(
            matches!(&err, CtrlError::ConfigParseError { file, .. } if *file == path.display().to_string())
        );
        std::fs::remove_dir_all(&dir).unwrap();

        let missing = AutomatonConfig::load_from_toml(&path).unwrap_err();
        assert!(matches!(missing, CtrlError::IoError(_)));
    }

    #[test]
    fn default_path_honours_the_environment() {
        let custom = std::env::temp_dir().join("hyctrl-custom.toml");
        // SAFETY: no other test in this crate reads or writes this variable
        unsafe { std::env::set_var(ENV_CONFIG_PATH, &custom) };
        assert_eq!(AutomatonConfig::default_path(), custom);

        unsafe { std::env::remove_var(ENV_CONFIG_PATH) };
        let path = AutomatonConfig::default_path();
        assert!(path.ends_with(Path::new("hyctrl").join("config.toml")));
    }

    #[test]
    fn effective_workers_is_bounded_by_jobs() {
        let conf = AutomatonConfig {
            worker_threads: 16,
            ..Default::default()
        };
        assert_eq!(conf.effective_workers(3), 3);
        assert_eq!(conf.effective_workers(0), 1);
    }
}
