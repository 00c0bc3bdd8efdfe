// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{Timestamp, GENESIS_TIME};
use bincode::{Decode, Encode};
use std::fmt;

/// Protocol version reported by witnesses in block header extensions
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Default, Hash, Encode, Decode,
)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Hardfork versions compare on major.minor only
    #[must_use]
    pub const fn hardfork_prefix(&self) -> (u8, u8) {
        (self.major, self.minor)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The version this binary speaks
pub const BLOCKCHAIN_VERSION: ProtocolVersion = ProtocolVersion::new(0, NUM_HARDFORKS as u8, 0);

/// Hardfork numbers. Gates are consulted exclusively through
/// `Chain::has_hardfork`; no call site hard-codes a raw number.
pub const HF_VERSION_REPORTING: u32 = 1;
pub const HF_VOTE_RETALLY: u32 = 2;
pub const HF_COUNT_RETALLY: u32 = 3;
pub const HF_REWARD_FUNDS: u32 = 4;
pub const HF_COLLATERAL_MARKETS: u32 = 5;
pub const HF_DELEGATION: u32 = 6;

pub const NUM_HARDFORKS: u32 = 6;

/// Version activated by each hardfork. Index 0 is genesis.
#[must_use]
pub fn hardfork_version(n: u32) -> ProtocolVersion {
    debug_assert!(n <= NUM_HARDFORKS);
    ProtocolVersion::new(0, n as u8, 0)
}

/// Default activation timestamp of each hardfork. Index 0 is genesis. A chain
/// bootstrapping from scratch activates everything at genesis; the times stay
/// distinct so witness-majority voting is exercised once `HF_VERSION_REPORTING`
/// is live.
#[must_use]
pub fn hardfork_time(n: u32) -> Timestamp {
    debug_assert!(n <= NUM_HARDFORKS);
    if n == 0 {
        GENESIS_TIME
    } else {
        GENESIS_TIME + n as u64 * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_monotonic() {
        for n in 1..=NUM_HARDFORKS {
            assert!(hardfork_version(n) > hardfork_version(n - 1));
            assert!(hardfork_time(n) > hardfork_time(n - 1));
        }
        assert_eq!(hardfork_version(NUM_HARDFORKS), BLOCKCHAIN_VERSION);
    }
}
