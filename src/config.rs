//! Configuration for the address manager.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::FLUSH_INTERVAL;

/// Configuration for the address manager.
#[derive(Clone, Debug, Serialize)]
pub struct Config {
    /// The directory holding the peers file.
    ///
    /// The manager owns this file exclusively; running two managers against
    /// the same directory is not supported.
    pub data_dir: PathBuf,

    /// How often the address book is flushed to disk while running.
    ///
    /// The book is also flushed once on shutdown, so short-lived managers
    /// persist their addresses regardless of this interval.
    pub flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_dir: PathBuf::from("."),
            flush_interval: FLUSH_INTERVAL,
        }
    }
}

impl Config {
    /// A config storing the peers file in `data_dir`, with default timing.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Config {
        Config {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields, default)]
        struct DConfig {
            data_dir: PathBuf,
            flush_interval: Duration,
        }

        impl Default for DConfig {
            fn default() -> Self {
                let config = Config::default();
                Self {
                    data_dir: config.data_dir,
                    flush_interval: config.flush_interval,
                }
            }
        }

        let DConfig {
            data_dir,
            flush_interval,
        } = DConfig::deserialize(deserializer)?;

        Ok(Config {
            data_dir,
            flush_interval,
        })
    }
}
