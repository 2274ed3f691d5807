use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Deserialize;

use trellis_client::QuickwitConfig;
use trellis_query::translate::GeohashDefaults;

fn default_geohash_precision() -> i64 {
    GeohashDefaults::default().precision
}

/// Datasource configuration: where Quickwit lives, which index to search,
/// the resolved field configuration and the builder defaults.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub quickwit: QuickwitConfig,

    #[serde(default = "default_geohash_precision")]
    pub geohash_precision: i64,
}

impl Config {
    pub fn geohash_defaults(&self) -> GeohashDefaults {
        GeohashDefaults {
            precision: self.geohash_precision,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}
