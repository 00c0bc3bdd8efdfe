// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::chain::{Chain, ChainResult, GenesisConfig};
use crate::chain::state::WitnessScheduleClass;
use crate::consensus::*;
use crate::primitives::{Asset, Authority, AMA};

impl Chain {
    /// Seed a fresh store: system accounts, the genesis producer, global
    /// singletons and the TaPoS ring. Runs outside any undo session.
    pub(crate) fn init_genesis(&mut self, genesis: &GenesisConfig) -> ChainResult<()> {
        let init_key = genesis.init_witness_key;

        // the burn account takes anything and pays out nothing
        self.store.accounts.create(|account| {
            account.name = NULL_ACCOUNT.to_owned();
            account.created = GENESIS_TIME;
            account.owner = Authority::impossible();
            account.active = Authority::impossible();
            account.posting = Authority::impossible();
        });

        let mut trivial = Authority::default();
        trivial.weight_threshold = 0;
        self.store.accounts.create(|account| {
            account.name = TEMP_ACCOUNT.to_owned();
            account.created = GENESIS_TIME;
            account.owner = trivial.clone();
            account.active = trivial.clone();
            account.posting = trivial;
        });

        self.store.accounts.create(|account| {
            account.name = ROOT_ACCOUNT.to_owned();
            account.created = GENESIS_TIME;
            account.memo_key = init_key;
            account.recovery_account = ROOT_ACCOUNT.to_owned();
            account.owner = Authority::single_key(init_key);
            account.active = Authority::single_key(init_key);
            account.posting = Authority::single_key(init_key);
            account.balance = Asset::new(genesis.initial_supply, AMA);
        });

        self.store.witnesses.create(|witness| {
            witness.owner = ROOT_ACCOUNT.to_owned();
            witness.created = GENESIS_TIME;
            witness.signing_key = init_key;
            witness.schedule = WitnessScheduleClass::Miner;
        });

        self.store.globals.create(|props| {
            props.current_witness = ROOT_ACCOUNT.to_owned();
            props.time = GENESIS_TIME;
            props.current_supply = Asset::new(genesis.initial_supply, AMA);
            props.virtual_supply = props.current_supply;
            props.maximum_block_size = MAX_BLOCK_SIZE as u32;
        });

        self.store.feed_history.create(|_| {});

        for _ in 0..0x1_0000u32 {
            self.store.block_summaries.create(|_| {});
        }

        self.store.hardfork_props.create(|hardforks| {
            hardforks.processed_hardforks.push(GENESIS_TIME);
        });

        self.store.witness_schedule.create(|schedule| {
            schedule.current_shuffled_witnesses = vec![ROOT_ACCOUNT.to_owned()];
            schedule.num_scheduled_witnesses = 1;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::chain::GenesisConfig;
    use rand::Rng;

    fn temp_dir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("amaranth-genesis-{}", rand::thread_rng().gen::<u64>()));
        dir
    }

    #[test]
    fn genesis_seeds_the_store() {
        let genesis = GenesisConfig {
            initial_supply: 1_000_000,
            init_witness_key: Default::default(),
        };
        let chain = Chain::open(&temp_dir(), "amaranth-testnet", &genesis).unwrap();

        assert_eq!(chain.head_block_num(), 0);
        assert_eq!(chain.head_block_time(), GENESIS_TIME);
        assert_eq!(
            chain.get_account(ROOT_ACCOUNT).unwrap().balance,
            Asset::new(1_000_000, AMA)
        );
        assert!(chain.get_account(NULL_ACCOUNT).is_ok());
        assert!(chain.get_witness(ROOT_ACCOUNT).is_ok());
        assert_eq!(chain.store.block_summaries.len(), 0x1_0000);
        assert!(chain.has_hardfork(0));
        assert!(!chain.has_hardfork(1));

        // supply invariants hold on the empty chain
        chain.validate_invariants().unwrap();
    }
}
