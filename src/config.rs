//! Global config for ant.
//! Includes the initial fetch width and the memoization toggle.

use camino::Utf8PathBuf;
use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

/// Global config variable for `Settings`
pub static ANT_CONFIG: OnceCell<Settings> = OnceCell::new();

/// Global path variable for the configuration file
pub static ANT_CONFIG_FILE: OnceCell<Utf8PathBuf> = OnceCell::new();

/// Gets the `ANT_CONFIG` settings. If uninitialized, sets the global
/// variable in the following order (greatest to least precedence):
/// - Env var per setting, e.g. `ANT_INITIAL_FETCH_WIDTH`
/// - Config file, which also has a configurable location (see
///   `ant_config_file()`), with e.g. TOML syntax:
///   ```toml
///   initial_fetch_width = 2
///   ```
/// - Default values, e.g. `initial_fetch_width = 1`
pub fn ant_config() -> &'static Settings {
    ANT_CONFIG
        .get_or_init(|| Settings::from_config(ant_config_file(None)).unwrap_or_default())
}

/// Gets the `ANT_CONFIG_FILE` path. If uninitialized, sets the global
/// variable in the following order (greatest to least precedence):
/// - `config_file` parameter if provided
/// - `ANT_CONFIG_FILE` env var
/// - Default location at `$HOME/.ant/ant.toml`
pub fn ant_config_file(config_file: Option<&Utf8PathBuf>) -> &'static Utf8PathBuf {
    ANT_CONFIG_FILE.get_or_init(|| {
        if let Some(file) = config_file {
            file.clone()
        } else if let Ok(file) = std::env::var("ANT_CONFIG_FILE") {
            Utf8PathBuf::from(file)
        } else {
            ant_default_dir().join("ant.toml")
        }
    })
}

/// Contains the ant config settings
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// First fetch width for a fresh value; widths double per origin on
    /// every successful fetch.
    pub initial_fetch_width: u64,

    /// Disabling memoization makes every suspension point a plain read.
    pub memo_enabled: bool,
}

impl Settings {
    /// Loads config settings from a file or env vars
    pub fn from_config(config_file: &Utf8PathBuf) -> Result<Self, ConfigError> {
        // Settings are read first to last, in order of increasing
        // precedence, so defaults come first.
        Config::builder()
            .set_default("initial_fetch_width", 1i64)?
            .set_default("memo_enabled", true)?
            .add_source(File::with_name(config_file.as_str()).required(false))
            .add_source(Environment::with_prefix("ANT"))
            .build()
            .and_then(|c| c.try_deserialize())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_fetch_width: 1,
            memo_enabled: true,
        }
    }
}

pub fn ant_default_dir() -> Utf8PathBuf {
    #[cfg(not(target_arch = "wasm32"))]
    let path = home_dir();
    #[cfg(target_arch = "wasm32")]
    let path = Utf8PathBuf::new();
    path.join(".ant")
}

/// Returns the home directory used by `cargo` and `rustup`
#[cfg(not(target_arch = "wasm32"))]
pub fn home_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(home::home_dir().expect("missing home directory"))
        .expect("path contains invalid Unicode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.initial_fetch_width, 1);
        assert!(s.memo_enabled);
    }
}
