//! CLI subcommand implementations

pub mod health;
pub mod run;
pub mod scan;
pub mod status;

use anyhow::Result;
use upbit_intraday::Config;

/// Load the config file when given, otherwise validated defaults
pub fn load_config(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default_validated()),
    }
}
