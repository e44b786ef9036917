//! Settings taken from the process environment.
//!
//! All variables carry the `REGRID_WRAPPER_` prefix, e.g. `REGRID_WRAPPER_LOG_DIR`.
use std::path::PathBuf;

use error_stack::ResultExt;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{RegridError, RegridResult};

pub const ENV_PREFIX: &str = "REGRID_WRAPPER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Directory for per-rank log files. No file logging if unset.
    pub log_dir: Option<PathBuf>,
    pub log_prefix: String,
    pub log_level: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_prefix: "Regrid-Wrapper".to_string(),
            log_level: "debug".to_string(),
        }
    }
}

impl Environment {
    pub fn from_env() -> RegridResult<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .change_context_lazy(|| RegridError::configuration(format!("invalid {ENV_PREFIX}* environment variables")))
    }

    /// The log file for `rank`, e.g. `<log_dir>/Regrid-Wrapper-0003.log`.
    pub fn create_log_file_path(&self, rank: usize) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{rank:04}.log", self.log_prefix)))
    }

    pub fn level_filter(&self) -> RegridResult<log::LevelFilter> {
        self.log_level
            .parse::<log::LevelFilter>()
            .change_context_lazy(|| RegridError::configuration(format!("invalid log level '{}'", self.log_level)))
    }

    /// The level to log at: an explicit command line choice wins over `LOG_LEVEL`.
    pub fn resolve_level(&self, cli_level: Option<log::LevelFilter>) -> RegridResult<log::LevelFilter> {
        match cli_level {
            Some(level) => Ok(level),
            None => self.level_filter(),
        }
    }
}
