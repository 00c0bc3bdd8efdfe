// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{BlockId, SignedBlock};
use std::collections::{BTreeMap, HashMap};
use triomphe::Arc;

#[derive(Debug)]
pub enum ForkDbError {
    /// The block's previous id is not in the reversible window
    Unlinked,

    /// Referenced block is not in the database
    UnknownBlock,

    /// The block failed its own id computation
    BadBlock(crate::primitives::TransactionError),
}

impl From<crate::primitives::TransactionError> for ForkDbError {
    fn from(other: crate::primitives::TransactionError) -> Self {
        Self::BadBlock(other)
    }
}

/// A reversible block held in the fork tree
#[derive(Debug)]
pub struct ForkItem {
    pub id: BlockId,
    pub num: u32,
    pub data: SignedBlock,
}

impl ForkItem {
    #[must_use]
    pub fn previous_id(&self) -> BlockId {
        self.data.header.previous
    }
}

/// Bounded in-memory tree of reversible blocks. Tracks the best head;
/// branches older than the irreversible horizon prune away.
#[derive(Default)]
pub struct ForkDatabase {
    index: HashMap<BlockId, Arc<ForkItem>>,
    by_num: BTreeMap<u32, Vec<BlockId>>,
    head: Option<Arc<ForkItem>>,
    max_size: u32,
}

impl ForkDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            by_num: BTreeMap::new(),
            head: None,
            max_size: crate::consensus::MAX_UNDO_HISTORY,
        }
    }

    pub fn reset(&mut self) {
        self.index.clear();
        self.by_num.clear();
        self.head = None;
    }

    /// Seed the database with the current head block, e.g. after reopening
    /// from the block log
    pub fn start_block(&mut self, block: SignedBlock) -> Result<Arc<ForkItem>, ForkDbError> {
        self.reset();
        let item = Arc::new(ForkItem {
            id: block.id()?,
            num: block.block_num(),
            data: block,
        });
        self.insert(item.clone());
        self.head = Some(item.clone());
        Ok(item)
    }

    /// Insert a block and return the head candidate afterwards. The caller
    /// decides whether to switch branches.
    pub fn push_block(&mut self, block: SignedBlock) -> Result<Arc<ForkItem>, ForkDbError> {
        let id = block.id()?;
        if let Some(existing) = self.index.get(&id) {
            return Ok(self
                .head
                .clone()
                .unwrap_or_else(|| existing.clone()));
        }

        let item = Arc::new(ForkItem {
            id,
            num: block.block_num(),
            data: block,
        });

        if !self.index.is_empty() && !self.index.contains_key(&item.previous_id()) {
            return Err(ForkDbError::Unlinked);
        }

        self.insert(item.clone());

        let switch = match &self.head {
            Some(head) => item.num > head.num,
            None => true,
        };
        if switch {
            self.head = Some(item);
            self.prune();
        }

        Ok(self.head.clone().expect("head set above"))
    }

    fn insert(&mut self, item: Arc<ForkItem>) {
        self.by_num.entry(item.num).or_default().push(item.id);
        self.index.insert(item.id, item);
    }

    fn prune(&mut self) {
        let head_num = match &self.head {
            Some(head) => head.num,
            None => return,
        };
        let horizon = head_num.saturating_sub(self.max_size);

        let stale: Vec<u32> = self
            .by_num
            .range(..horizon)
            .map(|(num, _)| *num)
            .collect();
        for num in stale {
            if let Some(ids) = self.by_num.remove(&num) {
                for id in ids {
                    self.index.remove(&id);
                }
            }
        }
    }

    pub fn remove(&mut self, id: &BlockId) {
        if let Some(item) = self.index.remove(id) {
            if let Some(ids) = self.by_num.get_mut(&item.num) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.by_num.remove(&item.num);
                }
            }
        }
    }

    #[must_use]
    pub fn head(&self) -> Option<Arc<ForkItem>> {
        self.head.clone()
    }

    pub fn set_head(&mut self, item: Arc<ForkItem>) {
        self.head = Some(item);
    }

    /// Step the head back to its parent
    pub fn pop_block(&mut self) {
        let prev = self
            .head
            .as_ref()
            .and_then(|head| self.index.get(&head.previous_id()).cloned());
        self.head = prev;
    }

    #[must_use]
    pub fn fetch_block(&self, id: &BlockId) -> Option<Arc<ForkItem>> {
        self.index.get(id).cloned()
    }

    #[must_use]
    pub fn fetch_block_by_number(&self, num: u32) -> Vec<Arc<ForkItem>> {
        self.by_num
            .get(&num)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.index.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The block at `num` on the branch the current head sits on
    #[must_use]
    pub fn fetch_block_on_main_branch_by_number(&self, num: u32) -> Option<Arc<ForkItem>> {
        let mut current = self.head.clone()?;
        if num > current.num {
            return None;
        }
        while current.num > num {
            current = self.index.get(&current.previous_id()).cloned()?;
        }
        Some(current)
    }

    /// The two disjoint branches from the common ancestor up to `first` and
    /// `second` respectively, each ordered head-first. The common ancestor
    /// itself is excluded.
    pub fn fetch_branch_from(
        &self,
        first: &BlockId,
        second: &BlockId,
    ) -> Result<(Vec<Arc<ForkItem>>, Vec<Arc<ForkItem>>), ForkDbError> {
        let mut first_item = self.index.get(first).cloned().ok_or(ForkDbError::UnknownBlock)?;
        let mut second_item = self
            .index
            .get(second)
            .cloned()
            .ok_or(ForkDbError::UnknownBlock)?;

        let mut first_branch = Vec::new();
        let mut second_branch = Vec::new();

        while first_item.num > second_item.num {
            first_branch.push(first_item.clone());
            first_item = self
                .index
                .get(&first_item.previous_id())
                .cloned()
                .ok_or(ForkDbError::Unlinked)?;
        }
        while second_item.num > first_item.num {
            second_branch.push(second_item.clone());
            second_item = self
                .index
                .get(&second_item.previous_id())
                .cloned()
                .ok_or(ForkDbError::Unlinked)?;
        }
        while first_item.id != second_item.id {
            first_branch.push(first_item.clone());
            second_branch.push(second_item.clone());
            first_item = self
                .index
                .get(&first_item.previous_id())
                .cloned()
                .ok_or(ForkDbError::Unlinked)?;
            second_item = self
                .index
                .get(&second_item.previous_id())
                .cloned()
                .ok_or(ForkDbError::Unlinked)?;
        }

        Ok((first_branch, second_branch))
    }

    /// Bound the reversible window; anything older prunes
    pub fn set_max_size(&mut self, max_size: u32) {
        self.max_size = max_size.max(1);
        self.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Hash256, SignedBlockHeader};

    fn block_after(prev: &BlockId, salt: u8) -> SignedBlock {
        SignedBlock {
            header: SignedBlockHeader {
                previous: *prev,
                timestamp: 1_700_000_000 + u64::from(salt),
                witness: "amaranth".into(),
                transaction_merkle_root: Hash256::hash_from_slice([salt]),
                extensions: vec![],
                witness_signature: Default::default(),
            },
            transactions: vec![],
        }
    }

    fn genesis_block() -> SignedBlock {
        block_after(&BlockId::default(), 0)
    }

    #[test]
    fn extends_head_on_the_same_branch() {
        let mut db = ForkDatabase::new();
        let b1 = genesis_block();
        let id1 = b1.id().unwrap();
        let head = db.push_block(b1).unwrap();
        assert_eq!(head.id, id1);

        let b2 = block_after(&id1, 1);
        let id2 = b2.id().unwrap();
        let head = db.push_block(b2).unwrap();
        assert_eq!(head.id, id2);
        assert_eq!(head.num, 2);
    }

    #[test]
    fn rejects_unlinked_blocks() {
        let mut db = ForkDatabase::new();
        db.push_block(genesis_block()).unwrap();

        let orphan_parent = BlockId::from_digest(&Hash256::hash_from_slice(b"lost"), 10);
        let orphan = block_after(&orphan_parent, 9);
        assert!(matches!(db.push_block(orphan), Err(ForkDbError::Unlinked)));
    }

    #[test]
    fn same_height_does_not_switch_head() {
        let mut db = ForkDatabase::new();
        let b1 = genesis_block();
        let id1 = b1.id().unwrap();
        db.push_block(b1).unwrap();

        let main2 = block_after(&id1, 1);
        let main2_id = main2.id().unwrap();
        db.push_block(main2).unwrap();

        let rival2 = block_after(&id1, 2);
        let head = db.push_block(rival2).unwrap();
        assert_eq!(head.id, main2_id);
        assert_eq!(db.fetch_block_by_number(2).len(), 2);
    }

    #[test]
    fn branch_fetch_excludes_the_ancestor() {
        let mut db = ForkDatabase::new();
        let b1 = genesis_block();
        let id1 = b1.id().unwrap();
        db.push_block(b1).unwrap();

        // main: 1 <- 2a; fork: 1 <- 2b <- 3b
        let b2a = block_after(&id1, 1);
        let id2a = b2a.id().unwrap();
        db.push_block(b2a).unwrap();

        let b2b = block_after(&id1, 2);
        let id2b = b2b.id().unwrap();
        db.push_block(b2b).unwrap();
        let b3b = block_after(&id2b, 3);
        let id3b = b3b.id().unwrap();
        let head = db.push_block(b3b).unwrap();
        assert_eq!(head.id, id3b);

        let (fork, main) = db.fetch_branch_from(&id3b, &id2a).unwrap();
        assert_eq!(
            fork.iter().map(|item| item.id).collect::<Vec<_>>(),
            vec![id3b, id2b]
        );
        assert_eq!(main.iter().map(|item| item.id).collect::<Vec<_>>(), vec![id2a]);
        // Both branches bottom out just above block 1
        assert_eq!(fork.last().unwrap().previous_id(), id1);
        assert_eq!(main.last().unwrap().previous_id(), id1);
    }

    #[test]
    fn main_branch_walks_through_the_head() {
        let mut db = ForkDatabase::new();
        let b1 = genesis_block();
        let id1 = b1.id().unwrap();
        db.push_block(b1).unwrap();
        let b2 = block_after(&id1, 1);
        let id2 = b2.id().unwrap();
        db.push_block(b2).unwrap();

        assert_eq!(db.fetch_block_on_main_branch_by_number(1).unwrap().id, id1);
        assert_eq!(db.fetch_block_on_main_branch_by_number(2).unwrap().id, id2);
        assert!(db.fetch_block_on_main_branch_by_number(3).is_none());
    }
}
