// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Amaranth
//! Official implementation of Amaranth, a delegated-proof-of-stake content
//! blockchain.
//!
//! The chain is a replicated deterministic state machine driven by signed
//! transactions organized into blocks, produced on a fixed three-second
//! schedule by an elected, rotating witness set. On top of the base ledger it
//! carries:
//!
//! * **Staked and liquid balances** — the liquid token (`AMA`) converts into
//!   non-transferable vesting shares (`VESTS`) that confer vote weight and
//!   withdraw over thirteen weekly installments.
//! * **Content rewards** — posts and replies accumulate stake-weighted votes
//!   and pay out of inflation-funded reward pools on a seven-day schedule,
//!   split between authors and curators.
//! * **A collateralized stable token** (`ABD`) plus user-issued
//!   market-issued assets with witness price feeds, margin-call liquidation
//!   and black-swan global settlement.
//! * **An on-chain limit-order exchange** matching orders by exact rational
//!   price.
//!
//! Consensus state lives in a transactional object store with nested undo
//! sessions; reversible blocks sit in an in-memory fork tree until a
//! supermajority of witnesses confirms them, at which point they migrate to
//! the append-only block log.

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod primitives;
pub mod settings;
