use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use confique::Config as _;

use crate::prelude::*;


/// The locations where metrond will look for a configuration file. The first
/// existing file in this list is used.
const DEFAULT_PATHS: &[&str] = &[
    "config.toml",
    "config.json5",
    "/etc/metrond/config.toml",
];

const CONFIG_PATH_ENV: &str = "METROND_CONFIG_PATH";

/// Configuration for metrond.
///
/// All relative paths are relative to the location of this configuration file.
/// Duration values are specified as string with a unit, e.g. "27s", or as a
/// plain number of seconds. Valid units: 'ms', 's', 'min', 'h' and 'd'.
///
/// The `server` section is only read by `metrond serve`, the `agent` section
/// only by `metrond agent`. Environment variables override file values.
#[derive(Debug, confique::Config)]
pub(crate) struct Config {
    #[config(nested)]
    pub(crate) server: crate::server::ServerConfig,

    #[config(nested)]
    pub(crate) agent: crate::agent::AgentConfig,

    #[config(nested)]
    pub(crate) log: crate::logger::LogConfig,
}

impl Config {
    /// Tries to find a config file by checking `METROND_CONFIG_PATH` and a
    /// list of default locations. If none exists, the built-in defaults are
    /// used as is.
    pub(crate) fn from_env_or_default_locations() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists()));

        match path {
            Some(path) => Self::load_from(&path),
            None => Self::builder().env().load().context("failed to load configuration"),
        }
    }

    /// Loads the configuration from a specific file (TOML or JSON5, decided
    /// by the file extension), layered under environment variables.
    pub(crate) fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::builder()
            .env()
            .file(path)
            .load()
            .context(format!("failed to load configuration from '{}'", path.display()))?;

        config.fix_paths(path)?;

        Ok(config)
    }

    /// Goes through all paths in the configuration and changes relative paths
    /// to be absolute based on the path of the configuration file itself.
    fn fix_paths(&mut self, config_path: &Path) -> Result<()> {
        fn fix_path(base_path: &Path, path: &mut PathBuf) {
            if path.is_relative() {
                *path = base_path.join(&path);
            }
        }

        let absolute_config_path = config_path.canonicalize()
            .context("failed to canonicalize config path")?;
        let base = absolute_config_path.parent()
            .ok_or_else(|| anyhow!("config file path has no parent"))?;

        fix_path(base, &mut self.server.snapshot.file);
        if let Some(p) = &mut self.server.crypto_key {
            fix_path(base, p);
        }
        if let Some(p) = &mut self.agent.crypto_key {
            fix_path(base, p);
        }
        if let Some(p) = &mut self.log.file {
            fix_path(base, p);
        }

        Ok(())
    }
}

/// Writes the generated TOML config template file to the given destination or
/// stdout.
pub(crate) fn write_template(path: Option<&PathBuf>) -> Result<()> {
    use confique::toml::FormatOptions;

    info!(
        "Writing configuration template to '{}'",
        path.map(|p| p.display().to_string()).unwrap_or("<stdout>".into()),
    );

    let template = confique::toml::template::<Config>(FormatOptions::default());
    match path {
        Some(path) => fs::write(path, template)?,
        None => io::stdout().write_all(template.as_bytes())?,
    }

    Ok(())
}

/// Our custom format for durations. A unit-less value is a number of seconds;
/// otherwise a unit is required.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;

    let s = String::deserialize(deserializer)?;

    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(start_unit) => s.split_at(start_unit),
        None => (s.as_str(), "s"),
    };
    let num: u64 = num.parse()
        .map_err(|e| D::Error::custom(format!("invalid integer for duration: {}", e)))?;

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "min" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 60 * 60)),
        "d" => Ok(Duration::from_secs(num * 60 * 60 * 24)),
        _ => Err(D::Error::custom("invalid unit of time for duration")),
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper(
        #[serde(deserialize_with = "super::deserialize_duration")]
        Duration,
    );

    fn parse(s: &str) -> Result<Duration, serde_json::Error> {
        serde_json::from_str::<Wrapper>(&format!("\"{s}\"")).map(|w| w.0)
    }

    #[test]
    fn durations_with_units() {
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse("5min").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn unitless_durations_are_seconds() {
        assert_eq!(parse("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn bad_durations_are_rejected() {
        assert!(parse("10 parsecs").is_err());
        assert!(parse("fast").is_err());
    }
}
