// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use config::{Config, ConfigError, Environment, File};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs::{metadata, File as FsFile};
use std::io::Write;
use std::path::PathBuf;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap();
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Node settings.
    pub node: Node,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut config_path = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        config_path.push("Amaranth");
        let config_dir = config_path.clone();
        config_path.push("config.toml");
        let default_settings = Settings::default();

        if metadata(&config_path).is_err() {
            let settings_str = toml::ser::to_string_pretty(&default_settings).unwrap();
            let _ = std::fs::create_dir_all(&config_dir);

            match FsFile::create(&config_path) {
                Ok(mut file) => {
                    file.write_all(settings_str.as_bytes()).unwrap_or(());
                }
                Err(err) => {
                    // Fall back to environment variables only
                    error!("Failed to create configuration! Reason: {err:#?}");
                }
            }
        }

        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(Environment::with_prefix("amaranth").separator("_"))
            .build()?;

        s.try_deserialize()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Node {
    /// Network name, also salts the chain id.
    pub network_name: String,

    /// Data directory holding the block log and state snapshots.
    pub data_dir: String,

    /// Flush the state snapshot roughly this many blocks apart. Zero disables.
    pub flush_interval: u32,

    /// Wipe the object store and replay the block log on startup.
    pub reindex: bool,

    /// Seed balance granted to the genesis producer on a fresh chain.
    pub initial_supply: i64,
}

impl Default for Node {
    fn default() -> Self {
        let mut data_dir: PathBuf = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        data_dir.push("Amaranth");

        Self {
            network_name: "amaranth".to_owned(),
            data_dir: data_dir.to_str().unwrap_or(".").to_owned(),
            flush_interval: 10_000,
            reindex: false,
            initial_supply: 0,
        }
    }
}
