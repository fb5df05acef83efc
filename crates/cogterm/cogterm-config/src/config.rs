use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct TermConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Serial backlog in bytes. Must be a power of two.
    #[serde(default = "defaults::ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "defaults::small_slots")]
    pub small_slots: usize,
    #[serde(default = "defaults::large_slots")]
    pub large_slots: usize,
    /// Depth of the worker-to-router slot id signal.
    #[serde(default = "defaults::signal_depth")]
    pub signal_depth: usize,
    /// Append-only USB traffic dump. Disabled when absent.
    #[serde(default)]
    pub usb_dump_path: Option<String>,
    /// Append-only control-line reset log. Disabled when absent.
    #[serde(default)]
    pub reset_history_path: Option<String>,
    #[serde(default)]
    pub serial: SerialConfig,
}

#[derive(Deserialize, Debug)]
pub struct SerialConfig {
    #[serde(default = "defaults::serial_port")]
    pub port: String,
    #[serde(default = "defaults::baud")]
    pub baud: u32,
    /// Control line pulsed at connect to put the target into a known
    /// boot state.
    #[serde(default = "defaults::reset_line")]
    pub reset_line: ResetLine,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResetLine {
    Dtr,
    Rts,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: defaults::serial_port(),
            baud: defaults::baud(),
            reset_line: defaults::reset_line(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn ring_capacity() -> usize {
        1 << 20 // 1 MiB
    }

    pub fn small_slots() -> usize {
        10_000
    }

    pub fn large_slots() -> usize {
        500
    }

    pub fn signal_depth() -> usize {
        4096
    }

    pub fn serial_port() -> String {
        "/dev/ttyUSB0".into()
    }

    pub fn baud() -> u32 {
        2_000_000
    }

    pub fn reset_line() -> super::ResetLine {
        super::ResetLine::Dtr
    }
}

impl Default for TermConfig {
    fn default() -> Self {
        // Serde defaults and programmatic defaults must agree; tests pin
        // this by parsing an empty document.
        toml::from_str("").expect("empty config parses with defaults")
    }
}

impl TermConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: TermConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
