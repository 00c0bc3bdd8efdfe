// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use amaranth::chain::{Chain, GenesisConfig};
use amaranth::settings::SETTINGS;
use chrono::{TimeZone, Utc};
use log::*;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc as StdArc;
use std::thread;
use std::time::Duration;
use triomphe::Arc;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let exit = StdArc::new(AtomicBool::new(false));
    for sig in TERM_SIGNALS {
        // A second term signal exits immediately; the first one starts a
        // clean shutdown.
        flag::register_conditional_shutdown(*sig, 1, exit.clone())?;
        flag::register(*sig, exit.clone())?;
    }

    let data_dir = PathBuf::from(&SETTINGS.node.data_dir);
    info!(
        "Opening chain for network {} at {}",
        SETTINGS.node.network_name,
        data_dir.display()
    );

    let genesis = GenesisConfig {
        initial_supply: SETTINGS.node.initial_supply,
        init_witness_key: Default::default(),
    };
    let mut chain = match Chain::open(&data_dir, &SETTINGS.node.network_name, &genesis) {
        Ok(chain) => chain,
        Err(err) => {
            error!("Failed to open chain: {err:?}");
            return Err("chain open failed".into());
        }
    };

    if SETTINGS.node.reindex {
        chain.reindex().map_err(|err| {
            error!("Reindex failed: {err:?}");
            "reindex failed"
        })?;
    }

    chain.set_flush_interval(SETTINGS.node.flush_interval);

    let head_num = chain.head_block_num();
    let head_time = Utc
        .timestamp_opt(chain.head_block_time() as i64, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| chain.head_block_time().to_string());
    info!("Chain is open, head block {head_num} at {head_time}");

    let chain = Arc::new(RwLock::new(chain));

    // Block until a termination signal arrives. Peer plumbing and the RPC
    // surface attach to `chain` from their own crates.
    loop {
        if exit.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }

    info!("Shutting down, flushing state");
    if let Err(err) = chain.read().flush() {
        error!("Final flush failed: {err:?}");
    }

    Ok(())
}
