// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::block_log::{BlockLog, BlockLogError};
use crate::chain::fork_db::{ForkDatabase, ForkDbError, ForkItem};
use crate::chain::state::*;
use crate::chain::store::{KeyPart, ObjectId, Store};
use crate::consensus::*;
use crate::primitives::*;
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use triomphe::Arc;

/// Validation skip flags, combined bitwise
pub const SKIP_NOTHING: u32 = 0;
pub const SKIP_WITNESS_SIGNATURE: u32 = 1 << 0;
pub const SKIP_TRANSACTION_SIGNATURES: u32 = 1 << 1;
pub const SKIP_TRANSACTION_DUPE_CHECK: u32 = 1 << 2;
pub const SKIP_FORK_DB: u32 = 1 << 3;
pub const SKIP_BLOCK_SIZE_CHECK: u32 = 1 << 4;
pub const SKIP_TAPOS_CHECK: u32 = 1 << 5;
pub const SKIP_AUTHORITY_CHECK: u32 = 1 << 6;
pub const SKIP_MERKLE_CHECK: u32 = 1 << 7;
pub const SKIP_UNDO_HISTORY_CHECK: u32 = 1 << 8;
pub const SKIP_WITNESS_SCHEDULE_CHECK: u32 = 1 << 9;
pub const SKIP_VALIDATE: u32 = 1 << 10;
pub const SKIP_VALIDATE_INVARIANTS: u32 = 1 << 11;
pub const SKIP_BLOCK_LOG: u32 = 1 << 12;

/// Flags used while replaying the block log: the log is trusted, so
/// everything expensive is skipped. The dedup index still rebuilds so a
/// replayed store is byte-identical to the one it replaces.
pub const REPLAY_SKIP_FLAGS: u32 = SKIP_WITNESS_SIGNATURE
    | SKIP_TRANSACTION_SIGNATURES
    | SKIP_TAPOS_CHECK
    | SKIP_MERKLE_CHECK
    | SKIP_WITNESS_SCHEDULE_CHECK
    | SKIP_AUTHORITY_CHECK
    | SKIP_VALIDATE
    | SKIP_VALIDATE_INVARIANTS
    | SKIP_UNDO_HISTORY_CHECK
    | SKIP_BLOCK_LOG;

#[derive(Debug)]
pub enum ChainError {
    /// Malformed operation or transaction field
    Validation(ValidationError),

    /// Transaction lacks a required signature
    AuthorityMissing(String),

    /// State precondition failed: insufficient balance, unknown account, ...
    Precondition(String),

    /// Block- or transaction-level protocol violation
    Protocol(String),

    /// Consensus-level failure: unknown hardfork, state/log divergence,
    /// exhausted undo history
    Consensus(String),

    /// Collateral shortfall in a context that may not trigger settlement
    BlackSwan,

    /// Unrecoverable failure, unwinds the block
    Fatal(String),

    Signature(TransactionError),
    Log(BlockLogError),
    Fork(ForkDbError),
}

impl From<ValidationError> for ChainError {
    fn from(other: ValidationError) -> Self {
        Self::Validation(other)
    }
}

impl From<TransactionError> for ChainError {
    fn from(other: TransactionError) -> Self {
        Self::Signature(other)
    }
}

impl From<BlockLogError> for ChainError {
    fn from(other: BlockLogError) -> Self {
        Self::Log(other)
    }
}

impl From<ForkDbError> for ChainError {
    fn from(other: ForkDbError) -> Self {
        Self::Fork(other)
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

pub(crate) fn precondition(cond: bool, msg: impl Into<String>) -> ChainResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ChainError::Precondition(msg.into()))
    }
}

pub(crate) fn protocol(cond: bool, msg: impl Into<String>) -> ChainResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ChainError::Protocol(msg.into()))
    }
}

/// An operation applied by the chain, as observers see it. Virtual
/// operations carry `virtual_op = true`.
#[derive(Debug, Clone)]
pub struct AppliedOperation {
    pub trx_id: TransactionId,
    pub block: u32,
    pub trx_in_block: u32,
    pub op_in_trx: u32,
    pub virtual_op: bool,
    pub op: Operation,
}

/// Seed parameters for a fresh chain
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    pub initial_supply: Share,
    pub init_witness_key: PublicKey,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            initial_supply: 0,
            init_witness_key: PublicKey::null(),
        }
    }
}

/// The replicated state machine. All mutation flows through here and only
/// touches the object store inside scoped undo sessions; the embedding node
/// owns the value behind a write lock.
pub struct Chain {
    pub store: Store,
    pub(crate) fork_db: ForkDatabase,
    pub(crate) block_log: BlockLog,
    pub(crate) chain_id: Hash256,
    data_dir: PathBuf,
    genesis: GenesisConfig,

    pub(crate) pending_tx: Vec<SignedTransaction>,
    pub(crate) popped_tx: VecDeque<SignedTransaction>,
    pending_session_active: bool,

    producing: bool,
    skip_flags: u32,

    pub(crate) applied_operations: Vec<AppliedOperation>,
    pub(crate) checkpoints: std::collections::BTreeMap<u32, BlockId>,
    /// Known-shared bad merkle roots, consulted before rejecting a block
    pub(crate) merkle_overrides: std::collections::BTreeMap<u32, Hash256>,

    flush_interval: u32,
    next_flush_block: u32,

    pub(crate) current_trx_id: TransactionId,
    pub(crate) current_block_num: u32,
    pub(crate) current_trx_in_block: u32,
    pub(crate) current_op_in_trx: u32,
}

impl Chain {
    /// Open (or create) the chain at `data_dir`. A stored snapshot is loaded
    /// and the reversible tail replayed from the block log; divergence
    /// between the two triggers a full reindex.
    pub fn open(data_dir: &Path, network: &str, genesis: &GenesisConfig) -> ChainResult<Self> {
        let block_log = BlockLog::open(data_dir)?;
        let chain_id = Hash256::hash_from_slice(network.as_bytes());

        let mut chain = Self {
            store: Store::default(),
            fork_db: ForkDatabase::new(),
            block_log,
            chain_id,
            data_dir: data_dir.to_owned(),
            genesis: genesis.clone(),
            pending_tx: Vec::new(),
            popped_tx: VecDeque::new(),
            pending_session_active: false,
            producing: false,
            skip_flags: SKIP_NOTHING,
            applied_operations: Vec::new(),
            checkpoints: std::collections::BTreeMap::new(),
            merkle_overrides: std::collections::BTreeMap::new(),
            flush_interval: 0,
            next_flush_block: 0,
            current_trx_id: TransactionId::default(),
            current_block_num: 0,
            current_trx_in_block: 0,
            current_op_in_trx: 0,
        };

        let snapshot_path = chain.snapshot_path();
        let loaded = match std::fs::read(&snapshot_path) {
            Ok(bytes) => match Store::from_snapshot_bytes(&bytes) {
                Ok(store) => {
                    chain.store = store;
                    true
                }
                Err(err) => {
                    warn!("State snapshot is unreadable ({err:?}), reindexing");
                    false
                }
            },
            Err(_) => false,
        };

        if loaded {
            let state_head = chain.store.props().head_block_number;
            let log_matches = match chain.block_log.read_block_by_num(state_head)? {
                Some(block) => block.id()? == chain.store.props().head_block_id,
                None => state_head == 0,
            };
            if !log_matches {
                return Err(ChainError::Consensus(
                    "chain state does not match block log, reindex required".into(),
                ));
            }
            chain.replay_from(state_head + 1)?;
        } else if chain.block_log.len()? > 0 {
            chain.init_genesis(genesis)?;
            chain.replay_from(1)?;
        } else {
            chain.init_genesis(genesis)?;
            chain.store.set_revision(0);
        }

        if let Some(head) = chain.block_log.read_block_by_num(chain.head_block_num())? {
            chain.fork_db.start_block(head)?;
        }

        Ok(chain)
    }

    /// Drop the object store and re-apply every block from the log.
    /// Signature, authority and invariant checks are skipped; each block is
    /// applied exactly once.
    pub fn reindex(&mut self) -> ChainResult<()> {
        info!("Reindexing blockchain");
        let genesis = self.genesis.clone();
        self.clear_pending();
        self.store = Store::default();
        self.fork_db.reset();
        self.init_genesis(&genesis)?;
        self.replay_from(1)?;
        if let Some(head) = self.block_log.read_block_by_num(self.head_block_num())? {
            self.fork_db.start_block(head)?;
        }
        info!("Done reindexing, head at {}", self.head_block_num());
        Ok(())
    }

    /// Apply logged blocks `[from, log_head]` without sessions, then align
    /// the store revision with the head block number.
    fn replay_from(&mut self, from: u32) -> ChainResult<()> {
        let last = self.block_log.len()?;
        if from > last {
            self.store.set_revision(u64::from(self.head_block_num()));
            return Ok(());
        }

        for num in from..=last {
            if num % 100_000 == 0 {
                info!("Replaying block {num} of {last}");
            }
            let block = self
                .block_log
                .read_block_by_num(num)?
                .ok_or_else(|| ChainError::Fatal(format!("block {num} missing from log")))?;
            self.apply_block(&block, REPLAY_SKIP_FLAGS)?;
        }
        self.store.set_revision(u64::from(self.head_block_num()));
        Ok(())
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }

    /// Delete persisted state on disk: always the store snapshot, and the
    /// block log too when `include_blocks` is set
    pub fn wipe(data_dir: &Path, include_blocks: bool) -> ChainResult<()> {
        let _ = std::fs::remove_file(data_dir.join("state.bin"));
        if include_blocks {
            let _ = std::fs::remove_file(data_dir.join("block_log"));
            let _ = std::fs::remove_file(data_dir.join("block_log.index"));
        }
        Ok(())
    }

    /// Write the committed state snapshot atomically
    pub fn flush(&self) -> ChainResult<()> {
        let bytes = self
            .store
            .snapshot_bytes()
            .map_err(|err| ChainError::Fatal(format!("snapshot encode failed: {err:?}")))?;
        let tmp = self.snapshot_path().with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|err| ChainError::Fatal(err.to_string()))?;
        std::fs::rename(&tmp, self.snapshot_path())
            .map_err(|err| ChainError::Fatal(err.to_string()))?;
        self.block_log.flush()?;
        Ok(())
    }

    /// Snapshot roughly every `flush_interval` blocks; zero disables
    pub fn set_flush_interval(&mut self, flush_interval: u32) {
        self.flush_interval = flush_interval;
        self.next_flush_block = 0;
    }

    pub fn add_checkpoints(&mut self, checkpoints: &[(u32, BlockId)]) {
        for (num, id) in checkpoints {
            self.checkpoints.insert(*num, *id);
        }
    }

    // --- accessors ---

    #[must_use]
    pub fn chain_id(&self) -> Hash256 {
        self.chain_id
    }

    #[must_use]
    pub fn head_block_num(&self) -> u32 {
        self.store.props().head_block_number
    }

    #[must_use]
    pub fn head_block_time(&self) -> Timestamp {
        self.store.props().time
    }

    #[must_use]
    pub fn head_block_id(&self) -> BlockId {
        self.store.props().head_block_id
    }

    #[must_use]
    pub fn is_producing(&self) -> bool {
        self.producing
    }

    #[must_use]
    pub fn skip_flags(&self) -> u32 {
        self.skip_flags
    }

    /// Drain operations applied since the last call. Observers see them in
    /// apply order; handlers run outside the write-locked region and cannot
    /// re-enter mutation.
    pub fn take_applied_operations(&mut self) -> Vec<AppliedOperation> {
        std::mem::take(&mut self.applied_operations)
    }

    #[must_use]
    pub fn witness_participation_rate(&self) -> u32 {
        let props = self.store.props();
        (PERCENT_100 as u32) * u32::from(props.participation_count) / 128
    }

    pub fn is_known_block(&self, id: &BlockId) -> ChainResult<bool> {
        Ok(self.fetch_block_by_id(id)?.is_some())
    }

    pub fn is_known_transaction(&self, id: &TransactionId) -> bool {
        self.store
            .transactions
            .find_by_key(
                TransactionDedupObject::BY_TRX_ID,
                vec![KeyPart::Bytes(id.0.to_vec())],
            )
            .is_some()
    }

    pub fn fetch_block_by_id(&self, id: &BlockId) -> ChainResult<Option<SignedBlock>> {
        if let Some(item) = self.fork_db.fetch_block(id) {
            return Ok(Some(item.data.clone()));
        }
        match self.block_log.read_block_by_num(id.block_num())? {
            Some(block) if block.id()? == *id => Ok(Some(block)),
            _ => Ok(None),
        }
    }

    pub fn fetch_block_by_number(&self, num: u32) -> ChainResult<Option<SignedBlock>> {
        let candidates = self.fork_db.fetch_block_by_number(num);
        if candidates.len() == 1 {
            return Ok(Some(candidates[0].data.clone()));
        }
        if let Some(item) = self.fork_db.fetch_block_on_main_branch_by_number(num) {
            return Ok(Some(item.data.clone()));
        }
        Ok(self.block_log.read_block_by_num(num)?)
    }

    pub fn find_block_id_for_num(&self, num: u32) -> ChainResult<Option<BlockId>> {
        if num == 0 {
            return Ok(None);
        }

        // The TaPoS ring is the cheapest lookup for recent blocks
        let slot = u64::from(num & 0xFFFF);
        if let Some(summary) = self.store.block_summaries.get(slot) {
            if summary.block_id.block_num() == num {
                return Ok(Some(summary.block_id));
            }
        }

        if let Some(block) = self.block_log.read_block_by_num(num)? {
            return Ok(Some(block.id()?));
        }

        Ok(self
            .fork_db
            .fetch_block_on_main_branch_by_number(num)
            .map(|item| item.id))
    }

    // --- slot arithmetic ---

    #[must_use]
    pub fn get_slot_time(&self, slot_num: u32) -> Timestamp {
        if slot_num == 0 {
            return 0;
        }

        let interval = BLOCK_INTERVAL_SECS;
        if self.head_block_num() == 0 {
            // first block lands one interval past genesis
            return self.head_block_time() + u64::from(slot_num) * interval;
        }

        let head_slot_time = (self.head_block_time() / interval) * interval;
        head_slot_time + u64::from(slot_num) * interval
    }

    #[must_use]
    pub fn get_slot_at_time(&self, when: Timestamp) -> u32 {
        let first_slot_time = self.get_slot_time(1);
        if when < first_slot_time {
            return 0;
        }
        ((when - first_slot_time) / BLOCK_INTERVAL_SECS) as u32 + 1
    }

    #[must_use]
    pub fn get_scheduled_witness(&self, slot_num: u32) -> AccountName {
        let props = self.store.props();
        let schedule = self.store.schedule();
        let current_aslot = props.current_aslot + u64::from(slot_num);
        let num = schedule.num_scheduled_witnesses.max(1) as u64;
        schedule.current_shuffled_witnesses[(current_aslot % num) as usize].clone()
    }

    // --- hardfork gates ---

    #[must_use]
    pub fn has_hardfork(&self, hardfork: u32) -> bool {
        self.store.hardforks().processed_hardforks.len() > hardfork as usize
    }

    /// Highest applied hardfork number
    #[must_use]
    pub fn hardfork_level(&self) -> u32 {
        self.store.hardforks().last_hardfork
    }

    // --- object lookups ---

    pub fn get_account_id(&self, name: &str) -> ChainResult<ObjectId> {
        self.store
            .accounts
            .find_by_key(AccountObject::BY_NAME, vec![KeyPart::Str(name.to_owned())])
            .ok_or_else(|| ChainError::Precondition(format!("unknown account {name}")))
    }

    pub fn find_account_id(&self, name: &str) -> Option<ObjectId> {
        self.store
            .accounts
            .find_by_key(AccountObject::BY_NAME, vec![KeyPart::Str(name.to_owned())])
    }

    pub fn get_account(&self, name: &str) -> ChainResult<&AccountObject> {
        let id = self.get_account_id(name)?;
        Ok(self.store.accounts.get(id).expect("indexed account"))
    }

    pub fn get_witness_id(&self, name: &str) -> ChainResult<ObjectId> {
        self.store
            .witnesses
            .find_by_key(WitnessObject::BY_NAME, vec![KeyPart::Str(name.to_owned())])
            .ok_or_else(|| ChainError::Precondition(format!("unknown witness {name}")))
    }

    pub fn find_witness_id(&self, name: &str) -> Option<ObjectId> {
        self.store
            .witnesses
            .find_by_key(WitnessObject::BY_NAME, vec![KeyPart::Str(name.to_owned())])
    }

    pub fn get_witness(&self, name: &str) -> ChainResult<&WitnessObject> {
        let id = self.get_witness_id(name)?;
        Ok(self.store.witnesses.get(id).expect("indexed witness"))
    }

    pub fn get_comment_id(&self, author: &str, permlink: &str) -> ChainResult<ObjectId> {
        self.store
            .comments
            .find_by_key(
                CommentObject::BY_PERMLINK,
                vec![
                    KeyPart::Str(author.to_owned()),
                    KeyPart::Str(permlink.to_owned()),
                ],
            )
            .ok_or_else(|| {
                ChainError::Precondition(format!("unknown comment {author}/{permlink}"))
            })
    }

    pub fn find_comment_id(&self, author: &str, permlink: &str) -> Option<ObjectId> {
        self.store.comments.find_by_key(
            CommentObject::BY_PERMLINK,
            vec![
                KeyPart::Str(author.to_owned()),
                KeyPart::Str(permlink.to_owned()),
            ],
        )
    }

    pub fn get_asset_id(&self, symbol: Symbol) -> ChainResult<ObjectId> {
        self.store
            .assets
            .find_by_key(AssetObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
            .ok_or_else(|| ChainError::Precondition(format!("unknown asset {symbol}")))
    }

    pub fn get_asset_dynamic_id(&self, symbol: Symbol) -> ChainResult<ObjectId> {
        self.store
            .asset_dynamics
            .find_by_key(AssetDynamicDataObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
            .ok_or_else(|| ChainError::Precondition(format!("unknown asset {symbol}")))
    }

    pub fn get_bitasset_id(&self, symbol: Symbol) -> ChainResult<ObjectId> {
        self.store
            .bitassets
            .find_by_key(BitassetDataObject::BY_SYMBOL, vec![KeyPart::U64(symbol.0)])
            .ok_or_else(|| {
                ChainError::Precondition(format!("{symbol} is not market issued"))
            })
    }

    pub fn get_reward_fund_id(&self, name: &str) -> ChainResult<ObjectId> {
        self.store
            .reward_funds
            .find_by_key(RewardFundObject::BY_NAME, vec![KeyPart::Str(name.to_owned())])
            .ok_or_else(|| ChainError::Precondition(format!("unknown reward fund {name}")))
    }

    // --- balance and supply plumbing ---

    #[must_use]
    pub fn get_balance(&self, account: &AccountObject, symbol: Symbol) -> Asset {
        if symbol == AMA {
            account.balance
        } else if symbol == ABD {
            account.abd_balance
        } else {
            let amount = self
                .store
                .account_balances
                .find_by_key(
                    AccountBalanceObject::BY_ACCOUNT_ASSET,
                    vec![KeyPart::Str(account.name.clone()), KeyPart::U64(symbol.0)],
                )
                .and_then(|id| self.store.account_balances.get(id))
                .map_or(0, |row| row.balance);
            Asset::new(amount, symbol)
        }
    }

    /// Credit or debit an account. Debits below zero fail; ABD touches
    /// accrue interest first.
    pub fn adjust_balance(&mut self, account_id: ObjectId, delta: Asset) -> ChainResult<()> {
        if delta.amount == 0 {
            return Ok(());
        }

        let symbol = delta.symbol;
        if symbol == AMA {
            let balance = self
                .store
                .accounts
                .get(account_id)
                .expect("indexed account")
                .balance;
            precondition(
                balance.amount + delta.amount >= 0,
                format!("insufficient AMA balance: {balance} < {}", -delta),
            )?;
            self.store.accounts.modify(account_id, |account| {
                account.balance += delta;
            });
            Ok(())
        } else if symbol == ABD {
            self.accrue_abd_interest(account_id)?;
            let balance = self
                .store
                .accounts
                .get(account_id)
                .expect("indexed account")
                .abd_balance;
            precondition(
                balance.amount + delta.amount >= 0,
                format!("insufficient ABD balance: {balance} < {}", -delta),
            )?;
            self.store.accounts.modify(account_id, |account| {
                account.abd_balance += delta;
            });
            Ok(())
        } else if symbol == VESTS {
            Err(ChainError::Precondition(
                "vesting shares are not a transferable balance".into(),
            ))
        } else {
            let owner = self
                .store
                .accounts
                .get(account_id)
                .expect("indexed account")
                .name
                .clone();
            let key = vec![KeyPart::Str(owner.clone()), KeyPart::U64(symbol.0)];
            match self
                .store
                .account_balances
                .find_by_key(AccountBalanceObject::BY_ACCOUNT_ASSET, key)
            {
                Some(id) => {
                    let balance = self
                        .store
                        .account_balances
                        .get(id)
                        .expect("indexed balance")
                        .balance;
                    precondition(
                        balance + delta.amount >= 0,
                        format!("insufficient {symbol} balance"),
                    )?;
                    self.store
                        .account_balances
                        .modify(id, |row| row.balance += delta.amount);
                }
                None => {
                    precondition(delta.amount > 0, format!("insufficient {symbol} balance"))?;
                    self.store.account_balances.create(|row| {
                        row.owner = owner;
                        row.symbol = symbol;
                        row.balance = delta.amount;
                    });
                }
            }
            Ok(())
        }
    }

    /// ABD balances earn the witness-voted interest rate, compounded no more
    /// often than the compound interval
    fn accrue_abd_interest(&mut self, account_id: ObjectId) -> ChainResult<()> {
        let now = self.head_block_time();
        let account = self.store.accounts.get(account_id).expect("indexed account");
        if account.abd_seconds_last_update == now {
            return Ok(());
        }

        let mut seconds = account.abd_seconds
            + account.abd_balance.amount.max(0) as u128
                * u128::from(now - account.abd_seconds_last_update);
        let due = seconds > 0
            && now - account.abd_last_interest_payment > ABD_INTEREST_COMPOUND_INTERVAL_SECS;

        let mut interest_paid = Asset::zero(ABD);
        if due {
            let interest = seconds / u128::from(SECONDS_PER_YEAR)
                * u128::from(self.store.props().abd_interest_rate)
                / u128::from(PERCENT_100);
            interest_paid = Asset::new(interest as Share, ABD);
            seconds = 0;
        }

        self.store.accounts.modify(account_id, |account| {
            account.abd_seconds = seconds;
            account.abd_seconds_last_update = now;
            if due {
                account.abd_last_interest_payment = now;
                account.abd_balance += interest_paid;
            }
        });

        if interest_paid.amount > 0 {
            let owner = self
                .store
                .accounts
                .get(account_id)
                .expect("indexed account")
                .name
                .clone();
            let median = self.store.feed().current_median_history;
            self.store.props_mut(|props| {
                props.current_abd_supply += interest_paid;
                if !median.is_null() {
                    props.virtual_supply += median.convert(interest_paid);
                }
            });
            self.push_virtual_operation(Operation::Interest(InterestOperation {
                owner,
                interest: interest_paid,
            }));
        }
        Ok(())
    }

    pub fn adjust_savings_balance(
        &mut self,
        account_id: ObjectId,
        delta: Asset,
    ) -> ChainResult<()> {
        if delta.amount == 0 {
            return Ok(());
        }

        let symbol = delta.symbol;
        if symbol == AMA {
            let balance = self
                .store
                .accounts
                .get(account_id)
                .expect("indexed account")
                .savings_balance;
            precondition(
                balance.amount + delta.amount >= 0,
                "insufficient savings balance",
            )?;
            self.store.accounts.modify(account_id, |account| {
                account.savings_balance += delta;
            });
            Ok(())
        } else if symbol == ABD {
            let now = self.head_block_time();
            let account = self.store.accounts.get(account_id).expect("indexed account");

            let mut seconds = account.savings_abd_seconds;
            let mut interest_paid = Asset::zero(ABD);
            let mut due = false;
            if account.savings_abd_seconds_last_update != now {
                seconds += account.savings_abd_balance.amount.max(0) as u128
                    * u128::from(now - account.savings_abd_seconds_last_update);
                due = seconds > 0
                    && now - account.savings_abd_last_interest_payment
                        > ABD_INTEREST_COMPOUND_INTERVAL_SECS;
                if due {
                    let interest = seconds / u128::from(SECONDS_PER_YEAR)
                        * u128::from(self.store.props().abd_interest_rate)
                        / u128::from(PERCENT_100);
                    interest_paid = Asset::new(interest as Share, ABD);
                    seconds = 0;
                }
            }

            let balance = account.savings_abd_balance;
            precondition(
                balance.amount + interest_paid.amount + delta.amount >= 0,
                "insufficient savings balance",
            )?;

            self.store.accounts.modify(account_id, |account| {
                if account.savings_abd_seconds_last_update != now {
                    account.savings_abd_seconds = seconds;
                    account.savings_abd_seconds_last_update = now;
                    if due {
                        account.savings_abd_last_interest_payment = now;
                        account.savings_abd_balance += interest_paid;
                    }
                }
                account.savings_abd_balance += delta;
            });

            if interest_paid.amount > 0 {
                let owner = self
                    .store
                    .accounts
                    .get(account_id)
                    .expect("indexed account")
                    .name
                    .clone();
                let median = self.store.feed().current_median_history;
                self.store.props_mut(|props| {
                    props.current_abd_supply += interest_paid;
                    if !median.is_null() {
                        props.virtual_supply += median.convert(interest_paid);
                    }
                });
                self.push_virtual_operation(Operation::Interest(InterestOperation {
                    owner,
                    interest: interest_paid,
                }));
            }
            Ok(())
        } else {
            Err(ChainError::Precondition(
                "savings hold AMA and ABD only".into(),
            ))
        }
    }

    /// Adjust tracked supply. For positive AMA deltas inside the bootstrap
    /// window, nine further shares land in the vesting fund.
    pub fn adjust_supply(&mut self, delta: Asset, adjust_vesting: bool) {
        let adjust_vesting =
            adjust_vesting && self.head_block_num() >= (BLOCKS_PER_DAY * 7) as u32;
        let median = self.store.feed().current_median_history;

        self.store.props_mut(|props| {
            if delta.symbol == AMA {
                let new_vesting = if adjust_vesting && delta.amount > 0 {
                    Asset::new(delta.amount * 9, AMA)
                } else {
                    Asset::zero(AMA)
                };
                props.current_supply += delta + new_vesting;
                props.virtual_supply += delta + new_vesting;
                props.total_vesting_fund += new_vesting;
                assert!(props.current_supply.amount >= 0, "supply underflow");
            } else if delta.symbol == ABD {
                props.current_abd_supply += delta;
                props.virtual_supply = if median.is_null() {
                    props.current_supply
                } else {
                    props.current_supply + median.convert(props.current_abd_supply)
                };
                assert!(props.current_abd_supply.amount >= 0, "supply underflow");
            } else {
                unreachable!("core supply tracks AMA and ABD only");
            }
        });
    }

    /// Convert AMA into new vesting shares for an account, preserving the
    /// fund/share ratio
    pub fn create_vesting(&mut self, account_id: ObjectId, amount: Asset) -> ChainResult<Asset> {
        assert_eq!(amount.symbol, AMA);
        let share_price = self.store.props().vesting_share_price();
        let new_vesting = share_price.convert(amount);

        self.store.accounts.modify(account_id, |account| {
            account.vesting_shares += new_vesting;
        });
        self.store.props_mut(|props| {
            props.total_vesting_fund += amount;
            props.total_vesting_shares += new_vesting;
        });
        self.adjust_proxied_witness_votes_simple(account_id, new_vesting.amount)?;
        Ok(new_vesting)
    }

    /// Convert part of an AMA reward into ABD at the print rate, the rest
    /// stays liquid. Returns (abd paid, ama paid).
    pub fn create_abd(&mut self, account_id: ObjectId, ama: Asset) -> ChainResult<(Asset, Asset)> {
        assert_eq!(ama.symbol, AMA);
        if ama.amount == 0 {
            return Ok((Asset::zero(ABD), Asset::zero(AMA)));
        }

        let median = self.store.feed().current_median_history;
        if median.is_null() {
            self.adjust_balance(account_id, ama)?;
            return Ok((Asset::zero(ABD), ama));
        }

        let print_rate = self.store.props().abd_print_rate;
        let to_abd_amount = percent_of(ama.amount, print_rate);
        let to_ama = Asset::new(ama.amount - to_abd_amount, AMA);
        let abd = median.convert(Asset::new(to_abd_amount, AMA));

        self.adjust_balance(account_id, abd)?;
        self.adjust_balance(account_id, to_ama)?;
        self.adjust_supply(Asset::new(-to_abd_amount, AMA), false);
        self.adjust_supply(abd, false);
        Ok((abd, to_ama))
    }

    /// Historical median price, ABD value of an AMA amount; zero when the
    /// feed is empty
    #[must_use]
    pub fn to_abd(&self, ama: Asset) -> Asset {
        let median = self.store.feed().current_median_history;
        if median.is_null() {
            Asset::zero(ABD)
        } else {
            median.convert(ama)
        }
    }

    // --- virtual operations & notifications ---

    pub fn push_virtual_operation(&mut self, op: Operation) {
        debug_assert!(op.is_virtual());
        self.applied_operations.push(AppliedOperation {
            trx_id: self.current_trx_id,
            block: self.current_block_num,
            trx_in_block: self.current_trx_in_block,
            op_in_trx: self.current_op_in_trx,
            virtual_op: true,
            op,
        });
    }

    fn record_applied_operation(&mut self, op: &Operation) {
        self.applied_operations.push(AppliedOperation {
            trx_id: self.current_trx_id,
            block: self.current_block_num,
            trx_in_block: self.current_trx_in_block,
            op_in_trx: self.current_op_in_trx,
            virtual_op: false,
            op: op.clone(),
        });
    }

    // --- pending pool ---

    fn reset_pending_session(&mut self) {
        if self.pending_session_active {
            self.store.undo_session();
            self.pending_session_active = false;
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending_tx.clear();
        self.reset_pending_session();
    }

    #[must_use]
    pub fn pending_transactions(&self) -> &[SignedTransaction] {
        &self.pending_tx
    }

    /// Validate a transaction against head state without keeping it
    pub fn validate_transaction(&mut self, trx: &SignedTransaction) -> ChainResult<()> {
        self.store.begin_session();
        let result = self.apply_transaction_internal(trx);
        self.store.undo_session();
        result
    }

    /// Attempt to push a transaction into the pending queue
    pub fn push_transaction(&mut self, trx: &SignedTransaction, skip: u32) -> ChainResult<()> {
        protocol(
            crate::codec::encoded_size(trx)
                <= self.store.props().maximum_block_size as usize - 256,
            "transaction exceeds maximum block size",
        )?;

        self.producing = true;
        let result = self.with_skip_flags(skip, |chain| chain.push_transaction_internal(trx));
        self.producing = false;
        result
    }

    fn push_transaction_internal(&mut self, trx: &SignedTransaction) -> ChainResult<()> {
        // The first push after a block opens the long-lived pending session
        // so arrival of the next block can rewind cheaply.
        if !self.pending_session_active {
            self.store.begin_session();
            self.pending_session_active = true;
        }

        self.store.begin_session();
        match self.apply_transaction_internal(trx) {
            Ok(()) => {
                self.store.squash_session();
                self.pending_tx.push(trx.clone());
                Ok(())
            }
            Err(err) => {
                self.store.undo_session();
                Err(err)
            }
        }
    }

    fn with_skip_flags<R>(
        &mut self,
        skip: u32,
        f: impl FnOnce(&mut Self) -> ChainResult<R>,
    ) -> ChainResult<R> {
        let old = self.skip_flags;
        self.skip_flags = skip;
        let result = f(self);
        self.skip_flags = old;
        result
    }

    /// Stash pending transactions, run `f`, then rebuild the pending state
    /// by re-applying popped and still-valid pending transactions.
    fn without_pending_transactions<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> ChainResult<R>,
    ) -> ChainResult<R> {
        let pending = std::mem::take(&mut self.pending_tx);
        self.reset_pending_session();

        let result = f(self);

        let popped: Vec<SignedTransaction> = self.popped_tx.drain(..).collect();
        for trx in popped.into_iter().chain(pending) {
            if let Err(err) = self.push_transaction_internal(&trx) {
                debug!("Dropping stale pending transaction: {err:?}");
            }
        }
        result
    }

    // --- block push ---

    /// Push a block arriving from a peer or just produced locally. Returns
    /// true when the push switched forks.
    pub fn push_block(&mut self, block: &SignedBlock, skip: u32) -> ChainResult<bool> {
        self.with_skip_flags(skip, |chain| {
            chain.without_pending_transactions(|chain| chain.push_block_internal(block))
        })
    }

    fn maybe_warn_multiple_production(&self, height: u32) {
        let blocks = self.fork_db.fetch_block_by_number(height);
        if blocks.len() > 1 {
            let witnesses: Vec<(AccountName, Timestamp)> = blocks
                .iter()
                .map(|item| (item.data.header.witness.clone(), item.data.header.timestamp))
                .collect();
            warn!("Encountered block num collision at block {height} due to a fork, witnesses are: {witnesses:?}");
        }
    }

    fn push_block_internal(&mut self, block: &SignedBlock) -> ChainResult<bool> {
        let skip = self.skip_flags;

        if skip & SKIP_FORK_DB == 0 {
            let new_head = self.fork_db.push_block(block.clone())?;
            self.maybe_warn_multiple_production(new_head.num);

            if new_head.data.header.previous != self.head_block_id() {
                // A head that is not higher than ours stays parked on its
                // branch
                if new_head.num <= self.head_block_num() {
                    return Ok(false);
                }
                self.switch_forks(new_head)?;
                return Ok(true);
            }
        }

        self.store.begin_session();
        match self.apply_block(block, skip) {
            Ok(()) => Ok(false),
            Err(err) => {
                error!("Failed to push new block: {err:?}");
                if let Ok(id) = block.id() {
                    self.fork_db.remove(&id);
                }
                self.store.undo_session();
                Err(err)
            }
        }
    }

    fn switch_forks(&mut self, new_head: Arc<ForkItem>) -> ChainResult<()> {
        info!("Switching to fork {}", new_head.id);
        let head_id = self.head_block_id();
        let (new_branch, old_branch) = self.fork_db.fetch_branch_from(&new_head.id, &head_id)?;

        let ancestor_prev = old_branch
            .last()
            .map(|item| item.previous_id())
            .or_else(|| new_branch.last().map(|item| item.previous_id()))
            .ok_or_else(|| ChainError::Fatal("empty fork branches".into()))?;

        // pop our blocks back to the common ancestor
        while self.head_block_id() != ancestor_prev {
            self.pop_block()?;
        }

        // apply the new branch, oldest first
        let skip = self.skip_flags;
        for (idx, item) in new_branch.iter().rev().enumerate() {
            self.store.begin_session();
            if let Err(err) = self.apply_block(&item.data, skip) {
                warn!("Exception thrown while switching forks: {err:?}");
                self.store.undo_session();

                // everything from the failed block up is invalid
                let bad_from = new_branch.len() - 1 - idx;
                for bad in new_branch[..=bad_from].iter() {
                    self.fork_db.remove(&bad.id);
                }
                if let Some(old_head) = old_branch.first() {
                    self.fork_db.set_head(old_head.clone());
                }

                // unwind whatever part of the new branch made it in
                while self.head_block_id() != ancestor_prev {
                    self.pop_block()?;
                }

                // restore the original branch
                for old_item in old_branch.iter().rev() {
                    self.store.begin_session();
                    self.apply_block(&old_item.data, skip)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove the head block, undoing its session. Its transactions return
    /// to the front of the pending queue.
    pub fn pop_block(&mut self) -> ChainResult<()> {
        self.reset_pending_session();

        let head_id = self.head_block_id();
        let head_block = self
            .fetch_block_by_id(&head_id)?
            .ok_or_else(|| ChainError::Fatal("there are no blocks to pop".into()))?;

        protocol(
            self.head_block_num() > self.store.props().last_irreversible_block_num,
            "cannot pop an irreversible block",
        )?;

        self.fork_db.pop_block();
        self.store.undo_session();

        for trx in head_block.transactions.into_iter().rev() {
            self.popped_tx.push_front(trx);
        }
        Ok(())
    }

    // --- block generation ---

    pub fn generate_block(
        &mut self,
        when: Timestamp,
        witness_owner: &str,
        signing_key: &secp256k1::SecretKey,
        skip: u32,
    ) -> ChainResult<SignedBlock> {
        self.with_skip_flags(skip, |chain| {
            chain.generate_block_internal(when, witness_owner, signing_key)
        })
    }

    fn generate_block_internal(
        &mut self,
        when: Timestamp,
        witness_owner: &str,
        signing_key: &secp256k1::SecretKey,
    ) -> ChainResult<SignedBlock> {
        let skip = self.skip_flags;

        let slot_num = self.get_slot_at_time(when);
        protocol(slot_num > 0, "generation time is in the past")?;
        let scheduled = self.get_scheduled_witness(slot_num);
        protocol(
            scheduled == witness_owner,
            format!("{witness_owner} is not scheduled for slot {slot_num} ({scheduled} is)"),
        )?;

        if skip & SKIP_WITNESS_SIGNATURE == 0 {
            let witness = self.get_witness(witness_owner)?;
            let public = PublicKey::from_secret(signing_key);
            protocol(
                witness.signing_key == public,
                "signing key does not match witness record",
            )?;
        }

        let maximum_block_size = self.store.props().maximum_block_size as usize;
        // rebuild pending state against the generation timestamp; pending
        // semantics may have shifted since the transactions arrived
        self.reset_pending_session();
        self.store.begin_session();
        self.pending_session_active = true;

        let max_block_header_size = 256usize;
        let mut total_block_size = max_block_header_size;
        let mut postponed_tx_count = 0u64;
        let mut included = Vec::new();

        let candidates = self.pending_tx.clone();
        for trx in &candidates {
            if trx.expiration < when {
                continue;
            }

            let trx_size = crate::codec::encoded_size(trx);
            if total_block_size + trx_size >= maximum_block_size {
                postponed_tx_count += 1;
                continue;
            }

            self.store.begin_session();
            match self.apply_transaction_internal(trx) {
                Ok(()) => {
                    self.store.squash_session();
                    total_block_size += trx_size;
                    included.push(trx.clone());
                }
                Err(_) => {
                    // transaction stays out of this block
                    self.store.undo_session();
                }
            }
        }
        if postponed_tx_count > 0 {
            warn!("Postponed {postponed_tx_count} transactions due to block size limit");
        }

        self.reset_pending_session();

        let mut block = SignedBlock {
            header: SignedBlockHeader {
                previous: self.head_block_id(),
                timestamp: when,
                witness: witness_owner.to_owned(),
                transaction_merkle_root: Hash256::default(),
                extensions: vec![],
                witness_signature: SignatureBytes::null(),
            },
            transactions: included,
        };
        block.header.transaction_merkle_root = block.calculate_merkle_root()?;

        if self.has_hardfork(HF_VERSION_REPORTING) {
            let witness = self.get_witness(witness_owner)?;
            if witness.running_version != BLOCKCHAIN_VERSION {
                block
                    .header
                    .extensions
                    .push(BlockHeaderExtension::Version(BLOCKCHAIN_VERSION));
            }

            let hardforks = self.store.hardforks();
            if hardforks.current_hardfork_version < hardfork_version(NUM_HARDFORKS) {
                // binary knows a newer hardfork; vote for it if the record
                // does not already
                let next = hardforks.last_hardfork + 1;
                if witness.hardfork_version_vote != hardfork_version(next)
                    || witness.hardfork_time_vote != hardfork_time(next)
                {
                    block.header.extensions.push(BlockHeaderExtension::HardforkVote(
                        HardforkVersionVote {
                            version: hardfork_version(next),
                            time: hardfork_time(next),
                        },
                    ));
                }
            } else if witness.hardfork_version_vote > hardfork_version(NUM_HARDFORKS) {
                // witness votes for a hardfork this binary does not know;
                // vote to stay put
                let last = hardforks.last_hardfork;
                block.header.extensions.push(BlockHeaderExtension::HardforkVote(
                    HardforkVersionVote {
                        version: hardfork_version(last),
                        time: hardfork_time(last),
                    },
                ));
            }
        }

        if skip & SKIP_WITNESS_SIGNATURE == 0 {
            block.header.sign(signing_key)?;
        }

        if skip & SKIP_BLOCK_SIZE_CHECK == 0 {
            protocol(
                block.encoded_size() <= MAX_BLOCK_SIZE,
                "generated block exceeds the protocol size cap",
            )?;
        }

        self.push_block(&block, skip)?;
        Ok(block)
    }

    // --- block application ---

    /// Apply a block inside the session the caller opened
    pub(crate) fn apply_block(&mut self, block: &SignedBlock, skip: u32) -> ChainResult<()> {
        let block_num = block.block_num();
        let mut skip = skip;

        if let Some((last_checkpoint, id)) = self.checkpoints.iter().next_back() {
            if let Some(expected) = self.checkpoints.get(&block_num) {
                protocol(
                    block.id()? == *expected,
                    format!("block {block_num} does not match checkpoint"),
                )?;
            }
            if *last_checkpoint >= block_num && !id.is_null() {
                // below the last checkpoint the history is known-good
                skip |= SKIP_WITNESS_SIGNATURE
                    | SKIP_TRANSACTION_SIGNATURES
                    | SKIP_TRANSACTION_DUPE_CHECK
                    | SKIP_TAPOS_CHECK
                    | SKIP_AUTHORITY_CHECK
                    | SKIP_UNDO_HISTORY_CHECK
                    | SKIP_WITNESS_SCHEDULE_CHECK
                    | SKIP_VALIDATE
                    | SKIP_VALIDATE_INVARIANTS;
            }
        }

        self.with_skip_flags(skip, |chain| chain.apply_block_internal(block))?;
        self.schedule_flush(block_num);
        Ok(())
    }

    fn schedule_flush(&mut self, block_num: u32) {
        if self.flush_interval == 0 {
            return;
        }

        if self.next_flush_block == 0 {
            let lep = block_num + 1 + self.flush_interval * 9 / 10;
            let rep = block_num + 1 + self.flush_interval;
            self.next_flush_block = rand::thread_rng().gen_range(lep..=rep);
        }

        if self.next_flush_block == block_num {
            self.next_flush_block = 0;
            debug!("Flushing state snapshot at block {block_num}");
            if let Err(err) = self.flush() {
                error!("State flush failed: {err:?}");
            }
        }
    }

    fn apply_block_internal(&mut self, block: &SignedBlock) -> ChainResult<()> {
        let skip = self.skip_flags;
        let block_num = block.block_num();

        if skip & SKIP_MERKLE_CHECK == 0 {
            let merkle_root = block.calculate_merkle_root()?;
            if block.header.transaction_merkle_root != merkle_root {
                let overridden = self
                    .merkle_overrides
                    .get(&block_num)
                    .map_or(false, |known| *known == merkle_root);
                protocol(overridden, format!("merkle check failed on block {block_num}"))?;
            }
        }

        let signing_witness_id = self.validate_block_header(skip, block)?;

        self.current_block_num = block_num;
        self.current_trx_in_block = 0;

        let block_size = block.encoded_size();
        protocol(
            block_size <= self.store.props().maximum_block_size as usize,
            format!("block {block_num} is too big"),
        )?;

        // evaluators must see who produced the including block
        let witness_name = block.header.witness.clone();
        self.store.props_mut(|props| {
            props.current_witness = witness_name;
        });

        self.process_header_extensions(block)?;

        if self.has_hardfork(HF_VERSION_REPORTING) {
            let witness = self
                .store
                .witnesses
                .get(signing_witness_id)
                .expect("indexed witness");
            protocol(
                witness.running_version >= self.store.hardforks().current_hardfork_version,
                format!(
                    "block produced by witness {} that is not running the current hardfork",
                    witness.owner
                ),
            )?;
        }

        for trx in &block.transactions {
            // No per-transaction session here: either the whole block
            // applies or the surrounding session unwinds.
            self.apply_transaction_internal(trx)?;
            self.current_trx_in_block += 1;
        }

        self.update_global_dynamic_data(block)?;
        self.update_signing_witness(signing_witness_id, block);

        self.create_block_summary(block)?;
        self.clear_expired_transactions();
        self.clear_expired_orders()?;
        self.clear_expired_delegations()?;
        self.update_expired_feeds()?;
        self.update_witness_schedule()?;

        self.update_median_feed()?;
        self.update_virtual_supply();

        // housekeeping, in fixed order
        self.clear_null_account_balance()?;
        self.process_funds()?;
        self.process_conversions()?;
        self.process_force_settlements()?;
        self.process_comment_cashout()?;
        self.process_vesting_withdrawals()?;
        self.process_savings_withdraws()?;
        self.pay_liquidity_reward()?;
        self.update_virtual_supply();

        self.account_recovery_processing()?;
        self.expire_escrow_ratification()?;
        self.process_decline_voting_rights()?;

        self.process_hardforks()?;

        self.update_last_irreversible_block()?;

        if skip & SKIP_VALIDATE_INVARIANTS == 0 {
            self.validate_invariants()?;
        }

        Ok(())
    }

    fn validate_block_header(&self, skip: u32, block: &SignedBlock) -> ChainResult<ObjectId> {
        protocol(
            self.head_block_id() == block.header.previous,
            format!(
                "previous id mismatch: head {} vs {}",
                self.head_block_id(),
                block.header.previous
            ),
        )?;
        protocol(
            self.head_block_time() < block.header.timestamp,
            "block timestamp must advance",
        )?;

        let witness_id = self.get_witness_id(&block.header.witness)?;
        let witness = self.store.witnesses.get(witness_id).expect("indexed witness");

        if skip & SKIP_WITNESS_SIGNATURE == 0 {
            protocol(
                block.header.validate_signee(&witness.signing_key),
                "block signature does not match the scheduled witness",
            )?;
        }

        if skip & SKIP_WITNESS_SCHEDULE_CHECK == 0 {
            let slot_num = self.get_slot_at_time(block.header.timestamp);
            protocol(slot_num > 0, "block slot is in the past")?;
            let scheduled_witness = self.get_scheduled_witness(slot_num);
            protocol(
                witness.owner == scheduled_witness,
                format!(
                    "witness {} produced a block at slot {slot_num} scheduled for {scheduled_witness}",
                    block.header.witness
                ),
            )?;
        }

        Ok(witness_id)
    }

    fn process_header_extensions(&mut self, block: &SignedBlock) -> ChainResult<()> {
        for extension in &block.header.extensions {
            match extension {
                BlockHeaderExtension::Version(reported) => {
                    let witness_id = self.get_witness_id(&block.header.witness)?;
                    let current = self
                        .store
                        .witnesses
                        .get(witness_id)
                        .expect("indexed witness")
                        .running_version;
                    if current != *reported {
                        let reported = *reported;
                        self.store.witnesses.modify(witness_id, |witness| {
                            witness.running_version = reported;
                        });
                    }
                }
                BlockHeaderExtension::HardforkVote(vote) => {
                    let witness_id = self.get_witness_id(&block.header.witness)?;
                    let vote = *vote;
                    self.store.witnesses.modify(witness_id, |witness| {
                        witness.hardfork_version_vote = vote.version;
                        witness.hardfork_time_vote = vote.time;
                    });
                }
            }
        }
        Ok(())
    }

    // --- transaction application ---

    pub(crate) fn apply_transaction_internal(
        &mut self,
        trx: &SignedTransaction,
    ) -> ChainResult<()> {
        let skip = self.skip_flags;
        let trx_id = trx.id()?;
        self.current_trx_id = trx_id;

        if skip & SKIP_VALIDATE == 0 {
            trx.validate()?;
        }

        if skip & SKIP_TRANSACTION_DUPE_CHECK == 0 {
            protocol(
                !self.is_known_transaction(&trx_id),
                format!("duplicate transaction {trx_id}"),
            )?;
        }

        let required = trx.required_authorities();

        if skip & (SKIP_TRANSACTION_SIGNATURES | SKIP_AUTHORITY_CHECK) == 0 {
            self.verify_authority(trx, &required)?;
        }

        let trx_size = crate::codec::encoded_size(trx) as u32;
        let is_market = trx.operations.iter().any(Operation::is_market);
        let mut throttled: Vec<AccountName> = required
            .active
            .iter()
            .chain(required.owner.iter())
            .chain(required.posting.iter())
            .cloned()
            .collect();
        throttled.sort();
        throttled.dedup();
        for name in throttled {
            let account_id = self.get_account_id(&name)?;
            if !self.has_hardfork(HF_REWARD_FUNDS) {
                self.update_account_bandwidth_old(account_id, trx_size, BandwidthClass::OldForum)?;
                if is_market {
                    self.update_account_bandwidth_old(
                        account_id,
                        trx_size,
                        BandwidthClass::OldMarket,
                    )?;
                }
            }
            self.update_account_bandwidth(account_id, trx_size, BandwidthClass::Forum)?;
            if is_market {
                self.update_account_bandwidth(
                    account_id,
                    trx_size * MARKET_BANDWIDTH_MULTIPLIER,
                    BandwidthClass::Market,
                )?;
            }
        }

        // Expiration and TaPoS are meaningless while applying block 1
        if self.head_block_num() > 0 {
            if skip & SKIP_TAPOS_CHECK == 0 {
                let summary = self
                    .store
                    .block_summaries
                    .get(u64::from(trx.ref_block_num))
                    .expect("summary ring seeded at genesis");
                protocol(
                    trx.ref_block_prefix == summary.block_id.tapos_prefix(),
                    "transaction TaPoS reference does not match a recent block",
                )?;
            }

            let now = self.head_block_time();
            protocol(
                trx.expiration <= now + MAX_TIME_UNTIL_EXPIRATION,
                "transaction expiration too far in the future",
            )?;
            protocol(now < trx.expiration, "transaction expired")?;
        }

        if skip & SKIP_TRANSACTION_DUPE_CHECK == 0 {
            let expiration = trx.expiration;
            self.store.transactions.create(|dedup| {
                dedup.trx_id = trx_id;
                dedup.expiration = expiration;
            });
        }

        self.current_op_in_trx = 0;
        for op in &trx.operations {
            self.apply_operation(op)?;
            self.current_op_in_trx += 1;
        }
        self.current_trx_id = TransactionId::default();

        Ok(())
    }

    pub(crate) fn apply_operation(&mut self, op: &Operation) -> ChainResult<()> {
        self.record_applied_operation(op);
        crate::chain::evaluators::apply(self, op)
    }

    fn verify_authority(
        &self,
        trx: &SignedTransaction,
        required: &RequiredAuthorities,
    ) -> ChainResult<()> {
        let signed_keys: std::collections::BTreeSet<PublicKey> =
            trx.signature_keys(&self.chain_id)?.into_iter().collect();

        let owner_of = |name: &str| -> Option<Authority> {
            self.find_account_id(name)
                .and_then(|id| self.store.accounts.get(id))
                .map(|account| account.owner.clone())
        };
        let active_of = |name: &str| -> Option<Authority> {
            self.find_account_id(name)
                .and_then(|id| self.store.accounts.get(id))
                .map(|account| account.active.clone())
        };
        let posting_of = |name: &str| -> Option<Authority> {
            self.find_account_id(name)
                .and_then(|id| self.store.accounts.get(id))
                .map(|account| account.posting.clone())
        };

        for name in &required.posting {
            let satisfied = [posting_of(name), active_of(name), owner_of(name)]
                .into_iter()
                .flatten()
                .any(|auth| authority_satisfied(&auth, &signed_keys, &active_of, 0));
            if !satisfied {
                return Err(ChainError::AuthorityMissing(format!(
                    "missing posting authority of {name}"
                )));
            }
        }

        for name in &required.active {
            let satisfied = [active_of(name), owner_of(name)]
                .into_iter()
                .flatten()
                .any(|auth| authority_satisfied(&auth, &signed_keys, &active_of, 0));
            if !satisfied {
                return Err(ChainError::AuthorityMissing(format!(
                    "missing active authority of {name}"
                )));
            }
        }

        for name in &required.owner {
            let satisfied = owner_of(name)
                .map_or(false, |auth| authority_satisfied(&auth, &signed_keys, &owner_of, 0));
            if !satisfied {
                return Err(ChainError::AuthorityMissing(format!(
                    "missing owner authority of {name}"
                )));
            }
        }

        for auth in &required.other {
            if !authority_satisfied(auth, &signed_keys, &active_of, 0) {
                return Err(ChainError::AuthorityMissing(
                    "missing explicitly required authority".into(),
                ));
            }
        }

        Ok(())
    }

    // --- per-block bookkeeping ---

    fn update_global_dynamic_data(&mut self, block: &SignedBlock) -> ChainResult<()> {
        let block_size = block.encoded_size() as u32;
        let block_id = block.id()?;
        let block_num = block.block_num();

        let mut missed_blocks = 0u32;
        if self.head_block_time() != 0 && self.head_block_num() != 0 {
            missed_blocks = self.get_slot_at_time(block.header.timestamp);
            assert!(missed_blocks != 0, "block slot already validated");
            missed_blocks -= 1;

            for i in 0..missed_blocks {
                let missed_name = self.get_scheduled_witness(i + 1);
                if missed_name == block.header.witness {
                    continue;
                }
                if let Some(witness_id) = self.find_witness_id(&missed_name) {
                    let head_num = self.head_block_num();
                    let mut shutdown = None;
                    self.store.witnesses.modify(witness_id, |witness| {
                        witness.total_missed += 1;
                        // a witness dark for a full day loses its key
                        if head_num.saturating_sub(witness.last_confirmed_block_num)
                            > BLOCKS_PER_DAY as u32
                        {
                            witness.signing_key = PublicKey::null();
                            shutdown = Some(witness.owner.clone());
                        }
                    });
                    if let Some(owner) = shutdown {
                        self.push_virtual_operation(Operation::WitnessShutdown(
                            WitnessShutdownOperation { owner },
                        ));
                    }
                }
            }
        }

        let slot_at_time = self.get_slot_at_time(block.header.timestamp);
        self.store.props_mut(|props| {
            for i in 0..=missed_blocks {
                props.participation_count -=
                    if props.recent_slots_filled & (1u128 << 127) != 0 { 1 } else { 0 };
                props.recent_slots_filled =
                    (props.recent_slots_filled << 1) + u128::from(i == 0);
                props.participation_count += u8::from(i == 0);
            }

            props.head_block_number = block_num;
            props.head_block_id = block_id;
            props.time = block.header.timestamp;
            props.current_aslot += u64::from(slot_at_time);
            props.average_block_size = (99 * props.average_block_size + block_size) / 100;

            // Network load above a quarter of capacity halves the reserve
            // ratio; otherwise it regrows linearly.
            if props.head_block_number % 20 == 0 {
                if props.average_block_size > props.maximum_block_size / 4 {
                    props.current_reserve_ratio /= 2;
                } else {
                    props.current_reserve_ratio += 1;
                }
                props.current_reserve_ratio =
                    props.current_reserve_ratio.clamp(1, MAX_RESERVE_RATIO);
            }
            props.max_virtual_bandwidth = u128::from(props.maximum_block_size)
                * u128::from(props.current_reserve_ratio)
                * u128::from(BANDWIDTH_PRECISION)
                * u128::from(BANDWIDTH_AVERAGE_WINDOW_SECS)
                / u128::from(BLOCK_INTERVAL_SECS);
        });

        if self.skip_flags & SKIP_UNDO_HISTORY_CHECK == 0 {
            let props = self.store.props();
            if props.head_block_number - props.last_irreversible_block_num
                >= MAX_UNDO_HISTORY
            {
                return Err(ChainError::Consensus(format!(
                    "undo history exhausted: head {} irreversible {}",
                    props.head_block_number, props.last_irreversible_block_num
                )));
            }
        }

        Ok(())
    }

    fn update_signing_witness(&mut self, witness_id: ObjectId, block: &SignedBlock) {
        let new_block_aslot =
            self.store.props().current_aslot; // already advanced to this block's slot
        let block_num = block.block_num();
        self.store.witnesses.modify(witness_id, |witness| {
            witness.last_aslot = new_block_aslot;
            witness.last_confirmed_block_num = block_num;
        });
    }

    fn create_block_summary(&mut self, block: &SignedBlock) -> ChainResult<()> {
        let slot = u64::from(block.block_num() & 0xFFFF);
        let id = block.id()?;
        self.store.block_summaries.modify(slot, |summary| {
            summary.block_id = id;
        });
        Ok(())
    }

    pub(crate) fn update_virtual_supply(&mut self) {
        let median = self.store.feed().current_median_history;
        self.store.props_mut(|props| {
            props.virtual_supply = if median.is_null() {
                props.current_supply
            } else {
                props.current_supply + median.convert(props.current_abd_supply)
            };

            if !median.is_null() {
                let abd_value = median.convert(props.current_abd_supply).amount;
                let percent_abd = if props.virtual_supply.amount > 0 {
                    ((abd_value as i128 * PERCENT_100 as i128)
                        / props.virtual_supply.amount as i128) as u16
                } else {
                    0
                };

                props.abd_print_rate = if percent_abd <= ABD_START_PERCENT {
                    PERCENT_100
                } else if percent_abd >= ABD_STOP_PERCENT {
                    0
                } else {
                    ((ABD_STOP_PERCENT - percent_abd) as u32 * PERCENT_100 as u32
                        / (ABD_STOP_PERCENT - ABD_START_PERCENT) as u32) as u16
                };
            }
        });
    }

    fn update_median_feed(&mut self) -> ChainResult<()> {
        if self.head_block_num() % FEED_INTERVAL_BLOCKS != 0 {
            return Ok(());
        }

        let now = self.head_block_time();
        let schedule = self.store.schedule();
        let mut feeds: Vec<Price> = Vec::with_capacity(schedule.num_scheduled_witnesses as usize);
        for name in schedule
            .current_shuffled_witnesses
            .iter()
            .take(schedule.num_scheduled_witnesses as usize)
        {
            if let Some(witness_id) = self.find_witness_id(name) {
                let witness = self.store.witnesses.get(witness_id).expect("indexed witness");
                if witness.last_abd_exchange_update + MAX_FEED_AGE_SECS >= now
                    && !witness.abd_exchange_rate.is_null()
                {
                    feeds.push(witness.abd_exchange_rate);
                }
            }
        }

        if feeds.len() < MIN_FEEDS {
            return Ok(());
        }

        feeds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_feed = feeds[feeds.len() / 2];

        let cap_feed = if self.has_hardfork(HF_COLLATERAL_MARKETS) {
            let props = self.store.props();
            // limit ABD to 10% of market cap
            if props.current_abd_supply.amount > 0 {
                Some(Price::new(
                    Asset::new(9 * props.current_abd_supply.amount, ABD),
                    props.current_supply,
                ))
            } else {
                None
            }
        } else {
            None
        };

        self.store.feed_mut(|feed| {
            feed.price_history.push(median_feed);
            if feed.price_history.len() > FEED_HISTORY_WINDOW {
                feed.price_history.remove(0);
            }

            if !feed.price_history.is_empty() {
                let mut sorted = feed.price_history.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                feed.current_median_history = sorted[sorted.len() / 2];

                if let Some(min_price) = cap_feed {
                    if min_price > feed.current_median_history {
                        feed.current_median_history = min_price;
                    }
                }
            }
        });
        Ok(())
    }

    // --- irreversibility ---

    fn update_last_irreversible_block(&mut self) -> ChainResult<()> {
        let schedule = self.store.schedule();
        let mut confirmations: Vec<u32> = schedule
            .current_shuffled_witnesses
            .iter()
            .take(schedule.num_scheduled_witnesses as usize)
            .filter_map(|name| self.find_witness_id(name))
            .map(|id| {
                self.store
                    .witnesses
                    .get(id)
                    .expect("indexed witness")
                    .last_confirmed_block_num
            })
            .collect();

        if !confirmations.is_empty() {
            let offset = ((PERCENT_100 - IRREVERSIBLE_THRESHOLD) as usize * confirmations.len())
                / PERCENT_100 as usize;
            confirmations.sort_unstable();
            let candidate = confirmations[offset];

            if candidate > self.store.props().last_irreversible_block_num {
                self.store.props_mut(|props| {
                    props.last_irreversible_block_num = candidate;
                });
            }
        }

        let last_irreversible = self.store.props().last_irreversible_block_num;
        self.store.commit(u64::from(last_irreversible));

        if self.skip_flags & SKIP_BLOCK_LOG == 0 {
            let mut log_head_num = self.block_log.len()?;
            if log_head_num < last_irreversible {
                while log_head_num < last_irreversible {
                    let item = self
                        .fork_db
                        .fetch_block_on_main_branch_by_number(log_head_num + 1)
                        .ok_or_else(|| {
                            ChainError::Fatal(
                                "fork database does not contain the last irreversible block"
                                    .into(),
                            )
                        })?;
                    self.block_log.append(&item.data)?;
                    log_head_num += 1;
                }
                self.block_log.flush()?;
            }
        }

        let props = self.store.props();
        self.fork_db.set_max_size(
            props.head_block_number - props.last_irreversible_block_num + 1,
        );
        Ok(())
    }

    // --- expirations ---

    fn clear_expired_transactions(&mut self) {
        let now = self.head_block_time();
        while let Some(id) = self
            .store
            .transactions
            .first_by_prefix(TransactionDedupObject::BY_EXPIRATION, vec![])
        {
            let expiration = self
                .store
                .transactions
                .get(id)
                .expect("indexed dedup entry")
                .expiration;
            if expiration >= now {
                break;
            }
            self.store.transactions.remove(id);
        }
    }

    fn clear_expired_delegations(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        while let Some(id) = self
            .store
            .delegation_expirations
            .first_by_prefix(VestingDelegationExpirationObject::BY_EXPIRATION, vec![])
        {
            let row = self
                .store
                .delegation_expirations
                .get(id)
                .expect("indexed delegation expiration")
                .clone();
            if row.expiration >= now {
                break;
            }

            let delegator_id = self.get_account_id(&row.delegator)?;
            self.store.accounts.modify(delegator_id, |account| {
                account.delegated_vesting_shares -= row.vesting_shares;
            });
            self.push_virtual_operation(Operation::ReturnVestingDelegation(
                ReturnVestingDelegationOperation {
                    account: row.delegator.clone(),
                    vesting_shares: row.vesting_shares,
                },
            ));
            self.store.delegation_expirations.remove(id);
        }
        Ok(())
    }

    fn account_recovery_processing(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();

        // expired recovery requests
        while let Some(id) = self
            .store
            .recovery_requests
            .first_by_prefix(AccountRecoveryRequestObject::BY_EXPIRATION, vec![])
        {
            let expires = self
                .store
                .recovery_requests
                .get(id)
                .expect("indexed recovery request")
                .expires;
            if expires > now {
                break;
            }
            self.store.recovery_requests.remove(id);
        }

        // stale owner-authority history
        while let Some(id) = self
            .store
            .owner_histories
            .first_by_prefix(OwnerAuthorityHistoryObject::BY_LAST_VALID, vec![])
        {
            let last_valid = self
                .store
                .owner_histories
                .get(id)
                .expect("indexed owner history")
                .last_valid_time;
            if last_valid + OWNER_AUTH_RECOVERY_SECS >= now {
                break;
            }
            self.store.owner_histories.remove(id);
        }

        // effective recovery-account changes
        while let Some(id) = self
            .store
            .change_recovery_requests
            .first_by_prefix(ChangeRecoveryAccountRequestObject::BY_EFFECTIVE_DATE, vec![])
        {
            let row = self
                .store
                .change_recovery_requests
                .get(id)
                .expect("indexed change request")
                .clone();
            if row.effective_on > now {
                break;
            }
            let account_id = self.get_account_id(&row.account_to_recover)?;
            self.store.accounts.modify(account_id, |account| {
                account.recovery_account = row.recovery_account.clone();
            });
            self.store.change_recovery_requests.remove(id);
        }

        Ok(())
    }

    fn expire_escrow_ratification(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        while let Some(id) = self.store.escrows.first_by_prefix(
            EscrowObject::BY_RATIFICATION_DEADLINE,
            vec![KeyPart::Bool(false)],
        ) {
            let escrow = self.store.escrows.get(id).expect("indexed escrow").clone();
            if escrow.is_approved() || escrow.ratification_deadline > now {
                break;
            }

            let from_id = self.get_account_id(&escrow.from)?;
            self.adjust_balance(from_id, escrow.ama_balance)?;
            self.adjust_balance(from_id, escrow.abd_balance)?;
            self.adjust_balance(from_id, escrow.pending_fee)?;
            self.store.escrows.remove(id);
        }
        Ok(())
    }

    fn process_decline_voting_rights(&mut self) -> ChainResult<()> {
        let now = self.head_block_time();
        while let Some(id) = self
            .store
            .decline_voting_requests
            .first_by_prefix(DeclineVotingRightsRequestObject::BY_EFFECTIVE_DATE, vec![])
        {
            let row = self
                .store
                .decline_voting_requests
                .get(id)
                .expect("indexed decline request")
                .clone();
            if row.effective_date > now {
                break;
            }

            let account_id = self.get_account_id(&row.account)?;
            let account = self.store.accounts.get(account_id).expect("indexed account");
            let mut delta = [0 as Share; MAX_PROXY_DEPTH + 1];
            delta[0] = -account.vesting_shares.amount;
            for (i, proxied) in account.proxied_vsf_votes.iter().enumerate() {
                delta[i + 1] = -proxied;
            }
            self.adjust_proxied_witness_votes(account_id, delta)?;
            self.clear_witness_votes(account_id)?;

            self.store.accounts.modify(account_id, |account| {
                account.can_vote = false;
                account.proxy = PROXY_TO_SELF.to_owned();
            });
            self.store.decline_voting_requests.remove(id);
        }
        Ok(())
    }
}
