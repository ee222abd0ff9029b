use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub static CONFIG_PATH_DEFAULT: &str = "/etc/pidtrack/pidtrack.toml";

static BPFTOOL_PATH_DEFAULT: &str = "/sbin/bpftool";
static SS_PATH_DEFAULT: &str = "ss";
static COMMAND_TIMEOUT_MS_DEFAULT: i64 = 10_000;
static WRITE_CONCURRENCY_DEFAULT: i64 = 1;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// bpftool binary used to update the pinned map.
    pub bpftool_path: String,
    /// ss binary used to list sockets with their owning processes.
    pub ss_path: String,
    /// Timeout applied to every external command.
    pub command_timeout_ms: u64,
    /// Number of map updates running at the same time.
    pub write_concurrency: usize,
}

impl Settings {
    /// Reads settings from built-in defaults, then the TOML file at `path`,
    /// then `PIDTRACK_*` environment variables. A missing file is an error
    /// only if `required` is set.
    pub fn new<P: AsRef<Path>>(path: P, required: bool) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        s.set_default("bpftool_path", BPFTOOL_PATH_DEFAULT)?;
        s.set_default("ss_path", SS_PATH_DEFAULT)?;
        s.set_default("command_timeout_ms", COMMAND_TIMEOUT_MS_DEFAULT)?;
        s.set_default("write_concurrency", WRITE_CONCURRENCY_DEFAULT)?;

        s.merge(
            File::from(path.as_ref())
                .format(FileFormat::Toml)
                .required(required),
        )?;
        s.merge(Environment::with_prefix("PIDTRACK"))?;

        let settings: Settings = s.try_into()?;
        if settings.command_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "command_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(settings)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
