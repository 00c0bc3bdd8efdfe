// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use static_assertions::const_assert;
use std::cmp;

/// Share type. All asset amounts are expressed in satoshis of their symbol.
pub type Share = i64;

/// Seconds since the unix epoch. Chain time never reads the wall clock; block
/// timestamps are supplied by the producing witness.
pub type Timestamp = u64;

/// Sentinel for "never" / "paid out" timestamps.
pub const TIMESTAMP_MAX: Timestamp = u64::MAX;

/// 100% in basis points. All protocol percentages are expressed against this.
pub const PERCENT_100: u16 = 10_000;

/// 1% in basis points
pub const PERCENT_1: u16 = PERCENT_100 / 100;

/// A new block is scheduled every `n` seconds
pub const BLOCK_INTERVAL_SECS: u64 = 3;

/// Blocks produced per year at full participation
pub const BLOCKS_PER_YEAR: u64 = 365 * 24 * 60 * 60 / BLOCK_INTERVAL_SECS;

/// Blocks produced per day at full participation
pub const BLOCKS_PER_DAY: u64 = 24 * 60 * 60 / BLOCK_INTERVAL_SECS;

/// Genesis timestamp. The first block lands one interval after this.
pub const GENESIS_TIME: Timestamp = 1_700_000_000;

/// Witnesses scheduled per round
pub const MAX_WITNESSES: usize = 21;

/// Top-voted witnesses per round
pub const TOP_WITNESSES: usize = 19;

/// Virtual-time (timeshare) slots per round
pub const TIMESHARE_WITNESSES: usize = 1;

/// Proof-of-work slots per round, filled while the miner queue is non-empty
pub const MINER_WITNESSES: usize = 1;

/// A block becomes irreversible once this share of the scheduled witnesses
/// have confirmed a block at or past it.
pub const IRREVERSIBLE_THRESHOLD: u16 = 70 * PERCENT_1;

/// Maximum reversible window. Applying a block that would leave the
/// irreversible boundary further behind than this fails.
pub const MAX_UNDO_HISTORY: u32 = 10_000;

/// Hard cap on block size. The effective limit is the witness-voted median,
/// never above this.
pub const MAX_BLOCK_SIZE: usize = 393_216;

/// Witnesses cannot vote the block size below this
pub const MIN_BLOCK_SIZE_LIMIT: usize = 65_536;

/// Transactions may not expire further than this past head time
pub const MAX_TIME_UNTIL_EXPIRATION: u64 = 60 * 60;

/// Annual inflation starts at 9.78% and narrows by 0.01% every
/// `INFLATION_NARROWING_PERIOD` blocks until it reaches 0.95%.
pub const INFLATION_RATE_START: i64 = 978;
pub const INFLATION_RATE_STOP: i64 = 95;
pub const INFLATION_NARROWING_PERIOD: u32 = 250_000;

/// Share of per-block inflation directed to the content reward funds
pub const CONTENT_REWARD_PERCENT: u16 = 75 * PERCENT_1;

/// Share of per-block inflation directed to the vesting fund
pub const VESTING_FUND_PERCENT: u16 = 15 * PERCENT_1;

/// Votes accumulate on a comment for this long before it pays out
pub const CASHOUT_WINDOW_SECS: u64 = 60 * 60 * 24 * 7;

/// Curation rewards for votes cast inside this window after a comment is
/// created are linearly discounted back into the author share
pub const REVERSE_AUCTION_WINDOW_SECS: u64 = 60 * 30;

/// Voting power regenerates from zero to full over this period
pub const VOTE_REGENERATION_SECS: u64 = 60 * 60 * 24 * 5;

/// A voter may edit a vote on the same comment at most this many times
pub const MAX_VOTE_CHANGES: u8 = 5;

/// Full-power votes a voter can cast per regeneration period before the
/// per-vote charge stops covering them
pub const MAX_VOTES_PER_REGENERATION_PERIOD: u32 = 40;

/// Witness approvals a single account may hold
pub const MAX_ACCOUNT_WITNESS_VOTES: u16 = 30;

/// Rshares below this contribute no curation weight
pub const VOTE_DUST_THRESHOLD: i64 = 50_000_000;

/// Curator share of a comment payout
pub const CURATION_PERCENT: u16 = 25 * PERCENT_1;

/// Curator share before `HF_REWARD_FUNDS`
pub const CURATION_PERCENT_LEGACY: u16 = 50 * PERCENT_1;

/// Saturation constant of the payout curve, in rshares
pub const CONTENT_CONSTANT: u128 = 2_000_000_000_000;

/// Half-life style linear decay window for reward-fund recent rshares²
pub const RECENT_RSHARES_DECAY_SECS: u64 = 60 * 60 * 24 * 15;

/// Named reward funds and their share of content rewards
pub const POST_REWARD_FUND_NAME: &str = "post";
pub const COMMENT_REWARD_FUND_NAME: &str = "comment";
pub const POST_REWARD_FUND_PERCENT: u16 = 75 * PERCENT_1;
pub const COMMENT_REWARD_FUND_PERCENT: u16 = 25 * PERCENT_1;

/// Maximum depth of a reply tree
pub const MAX_COMMENT_DEPTH: u16 = 6;

/// Minimum seconds between two root posts by the same author
pub const MIN_ROOT_COMMENT_INTERVAL_SECS: u64 = 60 * 5;

/// Minimum seconds between two replies by the same author
pub const MIN_REPLY_INTERVAL_SECS: u64 = 20;

/// The median price feed refreshes every `n` blocks
pub const FEED_INTERVAL_BLOCKS: u32 = 60 * 60 / BLOCK_INTERVAL_SECS as u32;

/// Witness feeds older than this are ignored by the median
pub const MAX_FEED_AGE_SECS: u64 = 60 * 60 * 24 * 7;

/// Number of medians retained in the feed history window
pub const FEED_HISTORY_WINDOW: usize = 24 * 7;

/// Minimum fresh witness feeds before the median updates
pub const MIN_FEEDS: usize = MAX_WITNESSES / 3;

/// ABD-to-AMA conversions execute this long after they are requested
pub const CONVERSION_DELAY_SECS: u64 = 60 * 60 * 84;

/// ABD printing throttles between these shares of market cap
pub const ABD_START_PERCENT: u16 = 2 * PERCENT_1;
pub const ABD_STOP_PERCENT: u16 = 5 * PERCENT_1;

/// ABD balances compound interest no more often than this
pub const ABD_INTEREST_COMPOUND_INTERVAL_SECS: u64 = 60 * 60 * 24 * 30;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Vesting withdrawals release over this many weekly installments
pub const VESTING_WITHDRAW_INTERVALS: u32 = 13;
pub const VESTING_WITHDRAW_INTERVAL_SECS: u64 = 60 * 60 * 24 * 7;

/// Maximum withdraw routes per account
pub const MAX_WITHDRAW_ROUTES: usize = 10;

/// Proxied vote buckets per account; proxy chains longer than this do not
/// propagate
pub const MAX_PROXY_DEPTH: usize = 4;

/// Delegated vesting returns to the delegator this long after removal
pub const DELEGATION_RETURN_SECS: u64 = CASHOUT_WINDOW_SECS;

/// Bandwidth accounting window and fixed-point scale
pub const BANDWIDTH_AVERAGE_WINDOW_SECS: u64 = 60 * 60 * 24 * 7;
pub const BANDWIDTH_PRECISION: u64 = 1_000_000;

/// Market operations consume this multiple of forum bandwidth
pub const MARKET_BANDWIDTH_MULTIPLIER: u32 = 10;

/// Reserve ratio bounds for virtual bandwidth scaling
pub const MAX_RESERVE_RATIO: u64 = 20_000;

/// Weighted-threshold authorities resolve account references at most this deep
pub const MAX_SIG_CHECK_DEPTH: u32 = 2;

/// An authority may name at most this many keys plus accounts
pub const MAX_AUTHORITY_MEMBERSHIP: usize = 10;

/// Owner authority history is kept (and usable for recovery) this long
pub const OWNER_AUTH_RECOVERY_SECS: u64 = 60 * 60 * 24 * 30;

/// Account recovery requests expire after this long
pub const ACCOUNT_RECOVERY_REQUEST_SECS: u64 = 60 * 60 * 24;

/// A recovery-account change takes effect after this long
pub const RECOVERY_ACCOUNT_CHANGE_SECS: u64 = 60 * 60 * 24 * 30;

/// Minimum seconds between owner-authority updates
pub const OWNER_UPDATE_LIMIT_SECS: u64 = 60 * 60;

/// Savings withdrawals complete after this long
pub const SAVINGS_WITHDRAW_SECS: u64 = 60 * 60 * 24 * 3;

/// Open savings withdrawals per account
pub const SAVINGS_WITHDRAW_REQUEST_LIMIT: u32 = 100;

/// The top liquidity provider is paid every `n` blocks (dead after
/// `HF_REWARD_FUNDS`)
pub const LIQUIDITY_REWARD_BLOCKS: u32 = 60 * 60 / BLOCK_INTERVAL_SECS as u32;
pub const LIQUIDITY_APR_PERCENT: u16 = 75;
pub const LIQUIDITY_TIMEOUT_SECS: u64 = 60 * 60 * 24 * 7;
pub const MIN_LIQUIDITY_REWARD_PERIOD_SECS: u64 = 60;
pub const MIN_LIQUIDITY_REWARD_AMOUNT: Share = 1_000 * BLOCK_INTERVAL_SECS as Share;

/// Escrow ratification must happen before the deadline set by the sender
pub const MAX_MEMO_SIZE: usize = 2_048;
pub const MAX_PERMLINK_LENGTH: usize = 256;
pub const MIN_ACCOUNT_NAME_LENGTH: usize = 3;
pub const MAX_ACCOUNT_NAME_LENGTH: usize = 16;

/// System account names
pub const ROOT_ACCOUNT: &str = "amaranth";
pub const NULL_ACCOUNT: &str = "null";
pub const TEMP_ACCOUNT: &str = "temp";

/// An account proxying to itself carries the empty proxy
pub const PROXY_TO_SELF: &str = "";

/// Sentinel parent author marking a root post
pub const ROOT_POST_PARENT: &str = "";

/// One lap of the timeshare virtual schedule
pub const VIRTUAL_SCHEDULE_LAP_LENGTH: u128 = u128::MAX;

/// Default collateral requirements for market-issued assets, in thousandths
pub const COLLATERAL_RATIO_DENOM: u16 = 1_000;
pub const MAINTENANCE_COLLATERAL_RATIO: u16 = 1_750;

/// A margin call pays at most this multiple of the feed-implied collateral
pub const MAX_SHORT_SQUEEZE_RATIO: u16 = 1_500;

/// Market fees cannot exceed 100%
pub const MAX_MARKET_FEE_PERCENT: u16 = PERCENT_100;

const_assert!(TOP_WITNESSES + TIMESHARE_WITNESSES + MINER_WITNESSES == MAX_WITNESSES);
const_assert!(CONTENT_REWARD_PERCENT as u32 + VESTING_FUND_PERCENT as u32 <= PERCENT_100 as u32);
const_assert!(POST_REWARD_FUND_PERCENT as u32 + COMMENT_REWARD_FUND_PERCENT as u32 == PERCENT_100 as u32);
const_assert!(ABD_START_PERCENT < ABD_STOP_PERCENT);

/// Take a basis-point share of an amount. Intermediate math is 128-bit.
#[must_use]
pub fn percent_of(amount: Share, pct: u16) -> Share {
    ((amount as i128 * pct as i128) / PERCENT_100 as i128) as Share
}

/// Instantaneous annual inflation rate in basis points at a given height
#[must_use]
pub fn current_inflation_rate(head_block_num: u32) -> i64 {
    cmp::max(
        INFLATION_RATE_START - (head_block_num / INFLATION_NARROWING_PERIOD) as i64,
        INFLATION_RATE_STOP,
    )
}

/// The payout curve: `r(r + 2c) / (r + 4c)`. Quadratic for small stakes,
/// saturating to linear near the content constant.
#[must_use]
pub fn calculate_vshares(rshares: u128, content_constant: u128) -> u128 {
    if rshares == 0 {
        return 0;
    }
    let two_alpha = content_constant * 2;
    rshares * (rshares + 2 * two_alpha) / (rshares + 4 * two_alpha)
}

/// Integer square root, used for curation weight capture
#[must_use]
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }

    let mut x = n;
    let mut y = (x + 1) >> 1;
    while y < x {
        x = y;
        y = (x + n / x) >> 1;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_narrows_inflation() {
        assert_eq!(current_inflation_rate(0), INFLATION_RATE_START);
        assert_eq!(
            current_inflation_rate(INFLATION_NARROWING_PERIOD),
            INFLATION_RATE_START - 1
        );
        assert_eq!(current_inflation_rate(u32::MAX), INFLATION_RATE_STOP);
    }

    #[test]
    fn it_saturates_the_payout_curve() {
        assert_eq!(calculate_vshares(0, CONTENT_CONSTANT), 0);

        // Small rshares are heavily discounted
        let small = calculate_vshares(1_000, CONTENT_CONSTANT);
        assert!(small < 1_000);

        // Near saturation the curve approaches r
        let big = 1u128 << 100;
        let v = calculate_vshares(big, CONTENT_CONSTANT);
        assert!(v > big / 2 && v < big);
    }

    #[test]
    fn it_takes_percentages() {
        assert_eq!(percent_of(10_000, PERCENT_100), 10_000);
        assert_eq!(percent_of(10_000, 25 * PERCENT_1), 2_500);
        assert_eq!(percent_of(0, 25 * PERCENT_1), 0);
    }

    #[test]
    fn it_computes_integer_square_roots() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1 << 64), 1 << 32);
    }
}
