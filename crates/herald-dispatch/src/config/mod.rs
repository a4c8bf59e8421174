//! Dispatcher config loader (strict parsing).

pub mod schema;

use std::fs;

use herald_core::error::{HeraldError, Result};

pub use schema::{DispatcherSettings, HeraldConfig};

pub fn load_from_file(path: &str) -> Result<HeraldConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| HeraldError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<HeraldConfig> {
    let cfg: HeraldConfig = serde_yaml::from_str(s)
        .map_err(|e| HeraldError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
