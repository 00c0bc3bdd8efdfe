// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::state::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Stable numeric identifier of a store object, unique per table
pub type ObjectId = u64;

/// One component of a secondary-index key. Components compare by value
/// within a kind; `Ratio` compares exactly by i128 cross-multiplication so
/// price-ordered indexes never lose precision. Keys of one index tag always
/// share a shape, so cross-kind comparisons only pin an arbitrary total
/// order for the `BTreeSet`.
#[derive(Clone, Debug)]
pub enum KeyPart {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    I64(i64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Numerator over positive denominator
    Ratio(i64, i64),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::U8(_) => 0,
            KeyPart::U16(_) => 1,
            KeyPart::U32(_) => 2,
            KeyPart::U64(_) => 3,
            KeyPart::U128(_) => 4,
            KeyPart::I64(_) => 5,
            KeyPart::Str(_) => 6,
            KeyPart::Bool(_) => 7,
            KeyPart::Bytes(_) => 8,
            KeyPart::Ratio(..) => 9,
        }
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        use KeyPart::*;
        match (self, other) {
            (U8(a), U8(b)) => a.cmp(b),
            (U16(a), U16(b)) => a.cmp(b),
            (U32(a), U32(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (U128(a), U128(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Ratio(an, ad), Ratio(bn, bd)) => {
                debug_assert!(*ad > 0 && *bd > 0);
                (*an as i128 * *bd as i128).cmp(&(*bn as i128 * *ad as i128))
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// A composite secondary-index key: the index tag plus its ordered parts
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey {
    pub tag: u8,
    pub parts: Vec<KeyPart>,
}

impl IndexKey {
    #[must_use]
    pub fn new(tag: u8, parts: Vec<KeyPart>) -> Self {
        Self { tag, parts }
    }
}

/// An object storable in a [`Table`]
pub trait StoreObject: Clone + Default + bincode::Encode + bincode::Decode {
    /// Secondary-index keys the object files under
    fn index_keys(&self, id: ObjectId) -> Vec<IndexKey>;
}

struct UndoLayer<T> {
    /// First-touch prior values; `None` marks an object created in this layer
    old_rows: BTreeMap<ObjectId, Option<T>>,
    old_next_id: ObjectId,
}

impl<T> UndoLayer<T> {
    fn new(next_id: ObjectId) -> Self {
        Self {
            old_rows: BTreeMap::new(),
            old_next_id: next_id,
        }
    }
}

/// A multi-index object table with nested undo layers. Every mutation made
/// while a layer is open records the inverse; `undo` restores, `squash`
/// merges into the parent, dropping the bottom layer commits it.
pub struct Table<T: StoreObject> {
    rows: BTreeMap<ObjectId, T>,
    index: BTreeSet<(IndexKey, ObjectId)>,
    next_id: ObjectId,
    undo: VecDeque<UndoLayer<T>>,
}

impl<T: StoreObject> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: BTreeSet::new(),
            next_id: 0,
            undo: VecDeque::new(),
        }
    }
}

impl<T: StoreObject> Clone for Table<T> {
    fn clone(&self) -> Self {
        let mut cloned = Self {
            rows: self.rows.clone(),
            index: self.index.clone(),
            next_id: self.next_id,
            undo: VecDeque::with_capacity(self.undo.len()),
        };
        for layer in &self.undo {
            cloned.undo.push_back(UndoLayer {
                old_rows: layer.old_rows.clone(),
                old_next_id: layer.old_next_id,
            });
        }
        cloned
    }
}

impl<T: StoreObject> Table<T> {
    pub fn create(&mut self, build: impl FnOnce(&mut T)) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;

        let mut row = T::default();
        build(&mut row);

        if let Some(layer) = self.undo.back_mut() {
            layer.old_rows.entry(id).or_insert(None);
        }
        for key in row.index_keys(id) {
            self.index.insert((key, id));
        }
        self.rows.insert(id, row);
        id
    }

    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.rows.get(&id)
    }

    /// Mutate an object in place, keeping the secondary indexes and undo log
    /// consistent. Calling this for an id that does not exist is a logic
    /// error and unwinds the block.
    pub fn modify(&mut self, id: ObjectId, f: impl FnOnce(&mut T)) {
        let row = self.rows.get_mut(&id).expect("modify of missing object");

        if let Some(layer) = self.undo.back_mut() {
            layer
                .old_rows
                .entry(id)
                .or_insert_with(|| Some(row.clone()));
        }

        let old_keys = row.index_keys(id);
        f(row);
        let new_keys = row.index_keys(id);

        if old_keys != new_keys {
            for key in old_keys {
                self.index.remove(&(key, id));
            }
            for key in new_keys {
                self.index.insert((key, id));
            }
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let row = self.rows.remove(&id)?;
        for key in row.index_keys(id) {
            self.index.remove(&(key, id));
        }
        if let Some(layer) = self.undo.back_mut() {
            layer.old_rows.entry(id).or_insert_with(|| Some(row.clone()));
        }
        Some(row)
    }

    /// Ascending scan of one index, restricted to keys beginning with
    /// `prefix` (empty prefix scans the whole index)
    pub fn iter_prefix<'a>(
        &'a self,
        tag: u8,
        prefix: Vec<KeyPart>,
    ) -> impl Iterator<Item = (&'a IndexKey, ObjectId)> + 'a {
        let start = (IndexKey::new(tag, prefix.clone()), 0 as ObjectId);
        self.index
            .range(start..)
            .take_while(move |(key, _)| {
                key.tag == tag
                    && key.parts.len() >= prefix.len()
                    && key.parts[..prefix.len()] == prefix[..]
            })
            .map(|(key, id)| (key, *id))
    }

    /// First id under a prefix, by ascending key order
    #[must_use]
    pub fn first_by_prefix(&self, tag: u8, prefix: Vec<KeyPart>) -> Option<ObjectId> {
        self.iter_prefix(tag, prefix).next().map(|(_, id)| id)
    }

    /// Last id under a prefix, by ascending key order
    #[must_use]
    pub fn last_by_prefix(&self, tag: u8, prefix: Vec<KeyPart>) -> Option<ObjectId> {
        self.iter_prefix(tag, prefix).last().map(|(_, id)| id)
    }

    /// Exact lookup on a unique index
    #[must_use]
    pub fn find_by_key(&self, tag: u8, parts: Vec<KeyPart>) -> Option<ObjectId> {
        self.iter_prefix(tag, parts.clone())
            .next()
            .filter(|(key, _)| key.parts == parts)
            .map(|(_, id)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn begin(&mut self) {
        self.undo.push_back(UndoLayer::new(self.next_id));
    }

    fn undo_top(&mut self) {
        let layer = self.undo.pop_back().expect("undo without session");
        for (id, old) in layer.old_rows {
            if let Some(current) = self.rows.remove(&id) {
                for key in current.index_keys(id) {
                    self.index.remove(&(key, id));
                }
            }
            if let Some(old_row) = old {
                for key in old_row.index_keys(id) {
                    self.index.insert((key, id));
                }
                self.rows.insert(id, old_row);
            }
        }
        self.next_id = layer.old_next_id;
    }

    fn squash_top(&mut self) {
        let top = self.undo.pop_back().expect("squash without session");
        let parent = self.undo.back_mut().expect("squash without parent");
        for (id, old) in top.old_rows {
            parent.old_rows.entry(id).or_insert(old);
        }
    }

    fn commit_bottom(&mut self) {
        self.undo.pop_front().expect("commit without session");
    }
}

impl<T: StoreObject> bincode::Encode for Table<T> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        // Undo layers never persist; the index rebuilds from the rows
        self.rows.encode(encoder)?;
        self.next_id.encode(encoder)
    }
}

impl<T: StoreObject> bincode::Decode for Table<T> {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let rows: BTreeMap<ObjectId, T> = BTreeMap::decode(decoder)?;
        let next_id = ObjectId::decode(decoder)?;

        let mut index = BTreeSet::new();
        for (id, row) in &rows {
            for key in row.index_keys(*id) {
                index.insert((key, *id));
            }
        }
        Ok(Self {
            rows,
            index,
            next_id,
            undo: VecDeque::new(),
        })
    }
}

impl<'de, T: StoreObject> bincode::BorrowDecode<'de> for Table<T> {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        bincode::Decode::decode(decoder)
    }
}

macro_rules! define_store {
    ($($field:ident: $ty:ty),+ $(,)?) => {
        /// The transactional object store. One outer undo session per applied
        /// block, a child session per transaction, a further child where an
        /// evaluation may roll back. Revisions align with head block numbers.
        #[derive(Default, Clone, bincode::Encode, bincode::Decode)]
        pub struct Store {
            $(pub $field: Table<$ty>,)+
            revision: u64,
            committed: u64,
            depth: u64,
        }

        impl Store {
            /// Open a nested undo session
            pub fn begin_session(&mut self) {
                $(self.$field.begin();)+
                self.depth += 1;
                self.revision += 1;
            }

            /// Discard the innermost session, restoring every touched object
            pub fn undo_session(&mut self) {
                assert!(self.depth > 0, "undo without session");
                $(self.$field.undo_top();)+
                self.depth -= 1;
                self.revision -= 1;
            }

            /// Merge the innermost session into its parent
            pub fn squash_session(&mut self) {
                assert!(self.depth > 1, "squash without parent session");
                $(self.$field.squash_top();)+
                self.depth -= 1;
                self.revision -= 1;
            }

            /// Commit sessions from the bottom of the stack up to `revision`,
            /// discarding their undo data
            pub fn commit(&mut self, revision: u64) {
                while self.committed < revision && self.depth > 0 {
                    $(self.$field.commit_bottom();)+
                    self.depth -= 1;
                    self.committed += 1;
                }
            }

            /// Unwind every open session
            pub fn undo_all(&mut self) {
                while self.depth > 0 {
                    self.undo_session();
                }
            }

            #[must_use]
            pub fn revision(&self) -> u64 {
                self.revision
            }

            #[must_use]
            pub fn committed_revision(&self) -> u64 {
                self.committed
            }

            #[must_use]
            pub fn session_depth(&self) -> u64 {
                self.depth
            }

            /// Align the revision counter with a head block number. Only legal
            /// with no open sessions.
            pub fn set_revision(&mut self, revision: u64) {
                assert!(self.depth == 0, "set_revision inside a session");
                self.revision = revision;
                self.committed = revision;
            }

            /// Serialized committed state: open sessions are unwound on a
            /// clone so the snapshot lands exactly at the committed revision.
            pub fn snapshot_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
                let mut committed = self.clone();
                committed.undo_all();
                crate::codec::encode_snapshot(&committed)
            }

            pub fn from_snapshot_bytes(
                bytes: &[u8],
            ) -> Result<Self, bincode::error::DecodeError> {
                crate::codec::decode_snapshot(bytes)
            }
        }
    };
}

define_store! {
    accounts: AccountObject,
    account_balances: AccountBalanceObject,
    bandwidth: AccountBandwidthObject,
    owner_histories: OwnerAuthorityHistoryObject,
    recovery_requests: AccountRecoveryRequestObject,
    change_recovery_requests: ChangeRecoveryAccountRequestObject,
    decline_voting_requests: DeclineVotingRightsRequestObject,
    savings_withdraws: SavingsWithdrawObject,
    withdraw_routes: WithdrawRouteObject,
    escrows: EscrowObject,
    delegations: VestingDelegationObject,
    delegation_expirations: VestingDelegationExpirationObject,
    comments: CommentObject,
    comment_votes: CommentVoteObject,
    witnesses: WitnessObject,
    witness_votes: WitnessVoteObject,
    witness_schedule: WitnessScheduleObject,
    limit_orders: LimitOrderObject,
    call_orders: CallOrderObject,
    force_settlements: ForceSettlementObject,
    convert_requests: ConvertRequestObject,
    assets: AssetObject,
    asset_dynamics: AssetDynamicDataObject,
    bitassets: BitassetDataObject,
    liquidity_rewards: LiquidityRewardBalanceObject,
    globals: DynamicGlobalPropertyObject,
    feed_history: FeedHistoryObject,
    reward_funds: RewardFundObject,
    block_summaries: BlockSummaryObject,
    transactions: TransactionDedupObject,
    hardfork_props: HardforkPropertyObject,
}

impl Store {
    /// The dynamic global properties singleton
    #[must_use]
    pub fn props(&self) -> &DynamicGlobalPropertyObject {
        self.globals.get(0).expect("store not seeded")
    }

    pub fn props_mut(&mut self, f: impl FnOnce(&mut DynamicGlobalPropertyObject)) {
        self.globals.modify(0, f);
    }

    #[must_use]
    pub fn feed(&self) -> &FeedHistoryObject {
        self.feed_history.get(0).expect("store not seeded")
    }

    pub fn feed_mut(&mut self, f: impl FnOnce(&mut FeedHistoryObject)) {
        self.feed_history.modify(0, f);
    }

    #[must_use]
    pub fn schedule(&self) -> &WitnessScheduleObject {
        self.witness_schedule.get(0).expect("store not seeded")
    }

    pub fn schedule_mut(&mut self, f: impl FnOnce(&mut WitnessScheduleObject)) {
        self.witness_schedule.modify(0, f);
    }

    #[must_use]
    pub fn hardforks(&self) -> &HardforkPropertyObject {
        self.hardfork_props.get(0).expect("store not seeded")
    }

    pub fn hardforks_mut(&mut self, f: impl FnOnce(&mut HardforkPropertyObject)) {
        self.hardfork_props.modify(0, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(store: &mut Store, name: &str, balance: i64) -> ObjectId {
        store.accounts.create(|a| {
            a.name = name.to_owned();
            a.balance.amount = balance;
        })
    }

    #[test]
    fn create_modify_remove_roundtrip() {
        let mut store = Store::default();
        let id = account(&mut store, "alice", 100);

        assert_eq!(store.accounts.get(id).unwrap().balance.amount, 100);
        store.accounts.modify(id, |a| a.balance.amount = 60);
        assert_eq!(store.accounts.get(id).unwrap().balance.amount, 60);

        store.accounts.remove(id);
        assert!(store.accounts.get(id).is_none());
    }

    #[test]
    fn name_index_follows_mutations() {
        let mut store = Store::default();
        let id = account(&mut store, "alice", 0);

        let by_name = |store: &Store, name: &str| {
            store
                .accounts
                .find_by_key(AccountObject::BY_NAME, vec![KeyPart::Str(name.into())])
        };

        assert_eq!(by_name(&store, "alice"), Some(id));
        store.accounts.modify(id, |a| a.name = "bob".into());
        assert_eq!(by_name(&store, "alice"), None);
        assert_eq!(by_name(&store, "bob"), Some(id));
    }

    #[test]
    fn undo_restores_prior_state() {
        let mut store = Store::default();
        let alice = account(&mut store, "alice", 100);

        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 1);
        let bob = account(&mut store, "bob", 7);
        assert_eq!(store.revision(), 1);

        store.undo_session();
        assert_eq!(store.accounts.get(alice).unwrap().balance.amount, 100);
        assert!(store.accounts.get(bob).is_none());
        assert_eq!(store.revision(), 0);

        // Ids are reusable after undo
        let bob2 = account(&mut store, "bob", 7);
        assert_eq!(bob, bob2);
    }

    #[test]
    fn squash_merges_into_parent() {
        let mut store = Store::default();
        let alice = account(&mut store, "alice", 100);

        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 90);

        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 80);
        store.squash_session();

        assert_eq!(store.accounts.get(alice).unwrap().balance.amount, 80);

        // Undoing the merged session restores the pre-parent state
        store.undo_session();
        assert_eq!(store.accounts.get(alice).unwrap().balance.amount, 100);
    }

    #[test]
    fn commit_discards_undo_data_from_the_bottom() {
        let mut store = Store::default();
        let alice = account(&mut store, "alice", 100);

        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 90);
        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 80);

        store.commit(1);
        assert_eq!(store.committed_revision(), 1);
        assert_eq!(store.session_depth(), 1);

        // The second session can still unwind to the committed boundary
        store.undo_session();
        assert_eq!(store.accounts.get(alice).unwrap().balance.amount, 90);
    }

    #[test]
    fn removed_objects_come_back_on_undo() {
        let mut store = Store::default();
        let alice = account(&mut store, "alice", 5);

        store.begin_session();
        store.accounts.remove(alice);
        assert!(store.accounts.get(alice).is_none());
        store.undo_session();

        let restored = store.accounts.get(alice).unwrap();
        assert_eq!(restored.name, "alice");
        assert_eq!(restored.balance.amount, 5);
    }

    #[test]
    fn snapshot_lands_at_the_committed_revision() {
        let mut store = Store::default();
        let alice = account(&mut store, "alice", 100);

        store.begin_session();
        store.accounts.modify(alice, |a| a.balance.amount = 1);

        let bytes = store.snapshot_bytes().unwrap();
        let restored = Store::from_snapshot_bytes(&bytes).unwrap();

        // Uncommitted session contents are not in the snapshot
        assert_eq!(restored.accounts.get(alice).unwrap().balance.amount, 100);
        assert_eq!(restored.session_depth(), 0);

        // The live store is unaffected
        assert_eq!(store.accounts.get(alice).unwrap().balance.amount, 1);
    }

    #[test]
    fn prefix_scans_are_ordered() {
        let mut store = Store::default();
        for (name, t) in [("c", 30u64), ("a", 10), ("b", 20)] {
            store.accounts.create(|a| {
                a.name = name.to_owned();
                a.next_vesting_withdrawal = t;
            });
        }

        let order: Vec<u64> = store
            .accounts
            .iter_prefix(AccountObject::BY_NEXT_VESTING_WITHDRAWAL, vec![])
            .map(|(key, _)| match key.parts[0] {
                KeyPart::U64(t) => t,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![10, 20, 30]);
    }
}
