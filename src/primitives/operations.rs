// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{
    ProtocolVersion, Share, Timestamp, MAINTENANCE_COLLATERAL_RATIO, MAX_ACCOUNT_NAME_LENGTH,
    MAX_MARKET_FEE_PERCENT, MAX_MEMO_SIZE, MAX_PERMLINK_LENGTH, MAX_SHORT_SQUEEZE_RATIO,
    MIN_ACCOUNT_NAME_LENGTH, MIN_BLOCK_SIZE_LIMIT, PERCENT_100,
};
use crate::primitives::{
    AccountName, Asset, Authority, BlockId, Hash256, Price, PublicKey, SignedBlockHeader, Symbol,
    ABD, AMA, VESTS,
};
use bincode::{Decode, Encode};
use std::collections::BTreeSet;

#[derive(Debug)]
pub enum ValidationError {
    /// A field-level constraint does not hold
    Invalid(&'static str),
}

pub(crate) fn check(cond: bool, msg: &'static str) -> Result<(), ValidationError> {
    if cond {
        Ok(())
    } else {
        Err(ValidationError::Invalid(msg))
    }
}

/// Account names are lowercase alphanumerics plus dashes, starting with a
/// letter, 3 to 16 characters.
#[must_use]
pub fn is_valid_account_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < MIN_ACCOUNT_NAME_LENGTH || bytes.len() > MAX_ACCOUNT_NAME_LENGTH {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && !name.ends_with('-')
}

fn check_account_name(name: &str) -> Result<(), ValidationError> {
    check(is_valid_account_name(name), "invalid account name")
}

fn check_permlink(permlink: &str) -> Result<(), ValidationError> {
    check(
        !permlink.is_empty() && permlink.len() <= MAX_PERMLINK_LENGTH && permlink.is_ascii(),
        "invalid permlink",
    )
}

fn check_memo(memo: &str) -> Result<(), ValidationError> {
    check(memo.len() <= MAX_MEMO_SIZE, "memo too large")
}

/// Accounts whose signatures a transaction must carry, grouped by the
/// authority class each operation demands.
#[derive(Debug, Default, Clone)]
pub struct RequiredAuthorities {
    pub owner: BTreeSet<AccountName>,
    pub active: BTreeSet<AccountName>,
    pub posting: BTreeSet<AccountName>,
    pub other: Vec<Authority>,
}

/// Chain parameters every witness votes on; medians take effect per round
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct ChainProperties {
    pub account_creation_fee: Asset,
    pub maximum_block_size: u32,
    pub abd_interest_rate: u16,
}

impl Default for ChainProperties {
    fn default() -> Self {
        Self {
            account_creation_fee: Asset::new(1, AMA),
            maximum_block_size: MIN_BLOCK_SIZE_LIMIT as u32 * 2,
            abd_interest_rate: 0,
        }
    }
}

impl ChainProperties {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check(
            self.account_creation_fee.symbol == AMA && self.account_creation_fee.amount >= 0,
            "creation fee must be non-negative AMA",
        )?;
        check(
            self.maximum_block_size >= MIN_BLOCK_SIZE_LIMIT as u32,
            "block size vote below the floor",
        )?;
        check(
            self.abd_interest_rate <= PERCENT_100,
            "interest rate above 100%",
        )
    }
}

/// A witness-published feed for a market-issued asset
#[derive(PartialEq, Debug, Clone, Default, Encode, Decode)]
pub struct PriceFeed {
    /// Debt asset per collateral asset
    pub settlement_price: Price,
    pub maintenance_collateral_ratio: u16,
    pub maximum_short_squeeze_ratio: u16,
    pub core_exchange_rate: Price,
}

impl PriceFeed {
    #[must_use]
    pub fn with_price(settlement_price: Price, core_exchange_rate: Price) -> Self {
        Self {
            settlement_price,
            maintenance_collateral_ratio: MAINTENANCE_COLLATERAL_RATIO,
            maximum_short_squeeze_ratio: MAX_SHORT_SQUEEZE_RATIO,
            core_exchange_rate,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.settlement_price.is_null()
    }

    /// The least favorable price a margin call will pay, the settlement
    /// price discounted by the short-squeeze ratio.
    #[must_use]
    pub fn max_short_squeeze_price(&self) -> Price {
        let base = (self.settlement_price.base.amount as i128 * 1_000)
            .min(Share::MAX as i128) as Share;
        let quote = (self.settlement_price.quote.amount as i128
            * self.maximum_short_squeeze_ratio as i128)
            .min(Share::MAX as i128) as Share;
        Price::new(
            Asset::new(base.max(1), self.settlement_price.base.symbol),
            Asset::new(quote.max(1), self.settlement_price.quote.symbol),
        )
    }
}

/// Creation options common to every asset
#[derive(PartialEq, Debug, Clone, Default, Encode, Decode)]
pub struct AssetOptions {
    pub max_supply: Share,
    pub market_fee_percent: u16,
    pub max_market_fee: Share,
    /// Restrict holders to the whitelist when non-empty
    pub whitelist_authorities: Vec<AccountName>,
    pub core_exchange_rate: Price,
    pub description: String,
}

impl AssetOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check(self.max_supply > 0, "max supply must be positive")?;
        check(
            self.market_fee_percent <= MAX_MARKET_FEE_PERCENT,
            "market fee above 100%",
        )?;
        check(self.max_market_fee >= 0, "negative max market fee")
    }
}

/// Collateral rules of a market-issued asset
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct BitassetOptions {
    pub feed_lifetime_secs: u64,
    pub minimum_feeds: u8,
    pub force_settlement_delay_secs: u64,
    pub short_backing_asset: Symbol,
}

impl Default for BitassetOptions {
    fn default() -> Self {
        Self {
            feed_lifetime_secs: 60 * 60 * 24,
            minimum_feeds: 1,
            force_settlement_delay_secs: 60 * 60 * 24,
            short_backing_asset: AMA,
        }
    }
}

/// A payout beneficiary and its basis-point share of the author reward
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct BeneficiaryRoute {
    pub account: AccountName,
    pub weight: u16,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub enum CommentOptionsExtension {
    BeneficiaryRoutes(Vec<BeneficiaryRoute>),
}

// --- operation payloads ---

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct VoteOperation {
    pub voter: AccountName,
    pub author: AccountName,
    pub permlink: String,
    /// Basis points, negative for a downvote
    pub weight: i16,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct CommentOperation {
    pub parent_author: AccountName,
    pub parent_permlink: String,
    pub author: AccountName,
    pub permlink: String,
    pub title: String,
    pub body: String,
    pub json_metadata: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CommentOptionsOperation {
    pub author: AccountName,
    pub permlink: String,
    pub max_accepted_payout: Asset,
    pub percent_amaranth_dollars: u16,
    pub allow_votes: bool,
    pub allow_curation_rewards: bool,
    pub extensions: Vec<CommentOptionsExtension>,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct DeleteCommentOperation {
    pub author: AccountName,
    pub permlink: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct TransferOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
    pub memo: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct TransferToVestingOperation {
    pub from: AccountName,
    /// Empty means the sender vests to themselves
    pub to: AccountName,
    pub amount: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct WithdrawVestingOperation {
    pub account: AccountName,
    pub vesting_shares: Asset,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct SetWithdrawVestingRouteOperation {
    pub from_account: AccountName,
    pub to_account: AccountName,
    pub percent: u16,
    pub auto_vest: bool,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AccountCreateOperation {
    pub fee: Asset,
    pub creator: AccountName,
    pub new_account_name: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub posting: Authority,
    pub memo_key: PublicKey,
    pub json_metadata: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AccountCreateWithDelegationOperation {
    pub fee: Asset,
    pub delegation: Asset,
    pub creator: AccountName,
    pub new_account_name: AccountName,
    pub owner: Authority,
    pub active: Authority,
    pub posting: Authority,
    pub memo_key: PublicKey,
    pub json_metadata: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AccountUpdateOperation {
    pub account: AccountName,
    pub owner: Option<Authority>,
    pub active: Option<Authority>,
    pub posting: Option<Authority>,
    pub memo_key: PublicKey,
    pub json_metadata: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct WitnessUpdateOperation {
    pub owner: AccountName,
    pub url: String,
    pub block_signing_key: PublicKey,
    pub props: ChainProperties,
    pub fee: Asset,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct AccountWitnessVoteOperation {
    pub account: AccountName,
    pub witness: AccountName,
    pub approve: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct AccountWitnessProxyOperation {
    pub account: AccountName,
    /// Empty clears the proxy
    pub proxy: AccountName,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct CustomOperation {
    pub required_auths: Vec<AccountName>,
    pub id: u16,
    pub data: Vec<u8>,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct CustomJsonOperation {
    pub required_auths: Vec<AccountName>,
    pub required_posting_auths: Vec<AccountName>,
    pub id: String,
    pub json: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CustomBinaryOperation {
    pub required_owner_auths: Vec<AccountName>,
    pub required_active_auths: Vec<AccountName>,
    pub required_posting_auths: Vec<AccountName>,
    pub required_auths: Vec<Authority>,
    pub id: String,
    pub data: Vec<u8>,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct PowOperation {
    pub worker_account: AccountName,
    pub block_id: BlockId,
    pub nonce: u64,
    pub work: Hash256,
    pub props: ChainProperties,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct Pow2Operation {
    pub worker_account: AccountName,
    pub block_id: BlockId,
    pub nonce: u64,
    pub pow_summary: u32,
    pub props: ChainProperties,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct ReportOverProductionOperation {
    pub reporter: AccountName,
    pub first_block: SignedBlockHeader,
    pub second_block: SignedBlockHeader,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FeedPublishOperation {
    pub publisher: AccountName,
    /// ABD per AMA
    pub exchange_rate: Price,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct ConvertOperation {
    pub owner: AccountName,
    pub request_id: u32,
    pub amount: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct LimitOrderCreateOperation {
    pub owner: AccountName,
    pub order_id: u32,
    pub amount_to_sell: Asset,
    pub min_to_receive: Asset,
    pub fill_or_kill: bool,
    pub expiration: Timestamp,
}

impl LimitOrderCreateOperation {
    #[must_use]
    pub fn sell_price(&self) -> Price {
        Price::new(self.amount_to_sell, self.min_to_receive)
    }
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct LimitOrderCreate2Operation {
    pub owner: AccountName,
    pub order_id: u32,
    pub amount_to_sell: Asset,
    pub exchange_rate: Price,
    pub fill_or_kill: bool,
    pub expiration: Timestamp,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct LimitOrderCancelOperation {
    pub owner: AccountName,
    pub order_id: u32,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct ChallengeAuthorityOperation {
    pub challenger: AccountName,
    pub challenged: AccountName,
    pub require_owner: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct ProveAuthorityOperation {
    pub challenged: AccountName,
    pub require_owner: bool,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct RequestAccountRecoveryOperation {
    pub recovery_account: AccountName,
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct RecoverAccountOperation {
    pub account_to_recover: AccountName,
    pub new_owner_authority: Authority,
    pub recent_owner_authority: Authority,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct ChangeRecoveryAccountOperation {
    pub account_to_recover: AccountName,
    pub new_recovery_account: AccountName,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct EscrowTransferOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub escrow_id: u32,
    pub abd_amount: Asset,
    pub ama_amount: Asset,
    pub fee: Asset,
    pub ratification_deadline: Timestamp,
    pub escrow_expiration: Timestamp,
    pub json_meta: String,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct EscrowApproveOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub escrow_id: u32,
    pub approve: bool,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct EscrowDisputeOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub escrow_id: u32,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct EscrowReleaseOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub agent: AccountName,
    pub who: AccountName,
    pub receiver: AccountName,
    pub escrow_id: u32,
    pub abd_amount: Asset,
    pub ama_amount: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct TransferToSavingsOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
    pub memo: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct TransferFromSavingsOperation {
    pub from: AccountName,
    pub request_id: u32,
    pub to: AccountName,
    pub amount: Asset,
    pub memo: String,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct CancelTransferFromSavingsOperation {
    pub from: AccountName,
    pub request_id: u32,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct DeclineVotingRightsOperation {
    pub account: AccountName,
    pub decline: bool,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct ResetAccountOperation {
    pub reset_account: AccountName,
    pub account_to_reset: AccountName,
    pub new_owner_authority: Authority,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct SetResetAccountOperation {
    pub account: AccountName,
    pub current_reset_account: AccountName,
    pub reset_account: AccountName,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct DelegateVestingSharesOperation {
    pub delegator: AccountName,
    pub delegatee: AccountName,
    pub vesting_shares: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetCreateOperation {
    pub issuer: AccountName,
    pub symbol: String,
    pub precision: u8,
    pub common_options: AssetOptions,
    pub bitasset_options: Option<BitassetOptions>,
    pub is_prediction_market: bool,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetIssueOperation {
    pub issuer: AccountName,
    pub asset_to_issue: Asset,
    pub issue_to_account: AccountName,
    pub memo: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetReserveOperation {
    pub payer: AccountName,
    pub amount_to_reserve: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetUpdateOperation {
    pub issuer: AccountName,
    pub asset_to_update: Symbol,
    pub new_issuer: Option<AccountName>,
    pub new_options: AssetOptions,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetUpdateBitassetOperation {
    pub issuer: AccountName,
    pub asset_to_update: Symbol,
    pub new_options: BitassetOptions,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct AssetUpdateFeedProducersOperation {
    pub issuer: AccountName,
    pub asset_to_update: Symbol,
    pub new_feed_producers: Vec<AccountName>,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetFundFeePoolOperation {
    pub from_account: AccountName,
    pub asset_symbol: Symbol,
    pub amount: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetGlobalSettleOperation {
    pub issuer: AccountName,
    pub asset_to_settle: Symbol,
    pub settle_price: Price,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetSettleOperation {
    pub account: AccountName,
    pub amount: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetForceSettleOperation {
    pub account: AccountName,
    pub amount: Asset,
    pub settlement_id: u32,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetPublishFeedOperation {
    pub publisher: AccountName,
    pub asset: Symbol,
    pub feed: PriceFeed,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetClaimFeesOperation {
    pub issuer: AccountName,
    pub amount_to_claim: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CallOrderUpdateOperation {
    pub funding_account: AccountName,
    pub delta_collateral: Asset,
    pub delta_debt: Asset,
}

// --- virtual operation payloads; produced by the chain, never signed ---

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FillOrderOperation {
    pub current_owner: AccountName,
    pub current_order_id: u32,
    pub current_pays: Asset,
    pub open_owner: AccountName,
    pub open_order_id: u32,
    pub open_pays: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FillAssetOrderOperation {
    pub order_id: u32,
    pub owner: AccountName,
    pub pays: Asset,
    pub receives: Asset,
    pub fee: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FillConvertRequestOperation {
    pub owner: AccountName,
    pub request_id: u32,
    pub amount_in: Asset,
    pub amount_out: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FillVestingWithdrawOperation {
    pub from_account: AccountName,
    pub to_account: AccountName,
    pub withdrawn: Asset,
    pub deposited: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct FillTransferFromSavingsOperation {
    pub from: AccountName,
    pub to: AccountName,
    pub amount: Asset,
    pub request_id: u32,
    pub memo: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AuthorRewardOperation {
    pub author: AccountName,
    pub permlink: String,
    pub abd_payout: Asset,
    pub ama_payout: Asset,
    pub vesting_payout: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CurationRewardOperation {
    pub curator: AccountName,
    pub reward: Asset,
    pub comment_author: AccountName,
    pub comment_permlink: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CommentRewardOperation {
    pub author: AccountName,
    pub permlink: String,
    pub payout: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct CommentBenefactorRewardOperation {
    pub benefactor: AccountName,
    pub author: AccountName,
    pub permlink: String,
    pub reward: Asset,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct CommentPayoutUpdateOperation {
    pub author: AccountName,
    pub permlink: String,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct LiquidityRewardOperation {
    pub owner: AccountName,
    pub payout: Asset,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct InterestOperation {
    pub owner: AccountName,
    pub interest: Asset,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct WitnessShutdownOperation {
    pub owner: AccountName,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct ReturnVestingDelegationOperation {
    pub account: AccountName,
    pub vesting_shares: Asset,
}

#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct HardforkOperation {
    pub hardfork_id: u32,
}

#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub struct AssetSettleCancelOperation {
    pub settlement_id: u32,
    pub account: AccountName,
    pub amount: Asset,
}

/// Every transaction payload the evaluator registry dispatches on, plus the
/// virtual operations the chain emits for observers.
#[derive(PartialEq, Debug, Clone, Encode, Decode)]
pub enum Operation {
    Vote(VoteOperation),
    Comment(CommentOperation),
    CommentOptions(CommentOptionsOperation),
    DeleteComment(DeleteCommentOperation),
    Transfer(TransferOperation),
    TransferToVesting(TransferToVestingOperation),
    WithdrawVesting(WithdrawVestingOperation),
    SetWithdrawVestingRoute(SetWithdrawVestingRouteOperation),
    AccountCreate(AccountCreateOperation),
    AccountCreateWithDelegation(AccountCreateWithDelegationOperation),
    AccountUpdate(AccountUpdateOperation),
    WitnessUpdate(WitnessUpdateOperation),
    AccountWitnessVote(AccountWitnessVoteOperation),
    AccountWitnessProxy(AccountWitnessProxyOperation),
    Custom(CustomOperation),
    CustomBinary(CustomBinaryOperation),
    CustomJson(CustomJsonOperation),
    Pow(PowOperation),
    Pow2(Pow2Operation),
    ReportOverProduction(ReportOverProductionOperation),
    FeedPublish(FeedPublishOperation),
    Convert(ConvertOperation),
    LimitOrderCreate(LimitOrderCreateOperation),
    LimitOrderCreate2(LimitOrderCreate2Operation),
    LimitOrderCancel(LimitOrderCancelOperation),
    ChallengeAuthority(ChallengeAuthorityOperation),
    ProveAuthority(ProveAuthorityOperation),
    RequestAccountRecovery(RequestAccountRecoveryOperation),
    RecoverAccount(RecoverAccountOperation),
    ChangeRecoveryAccount(ChangeRecoveryAccountOperation),
    EscrowTransfer(EscrowTransferOperation),
    EscrowApprove(EscrowApproveOperation),
    EscrowDispute(EscrowDisputeOperation),
    EscrowRelease(EscrowReleaseOperation),
    TransferToSavings(TransferToSavingsOperation),
    TransferFromSavings(TransferFromSavingsOperation),
    CancelTransferFromSavings(CancelTransferFromSavingsOperation),
    DeclineVotingRights(DeclineVotingRightsOperation),
    ResetAccount(ResetAccountOperation),
    SetResetAccount(SetResetAccountOperation),
    DelegateVestingShares(DelegateVestingSharesOperation),
    AssetCreate(AssetCreateOperation),
    AssetIssue(AssetIssueOperation),
    AssetReserve(AssetReserveOperation),
    AssetUpdate(AssetUpdateOperation),
    AssetUpdateBitasset(AssetUpdateBitassetOperation),
    AssetUpdateFeedProducers(AssetUpdateFeedProducersOperation),
    AssetFundFeePool(AssetFundFeePoolOperation),
    AssetGlobalSettle(AssetGlobalSettleOperation),
    AssetSettle(AssetSettleOperation),
    AssetForceSettle(AssetForceSettleOperation),
    AssetPublishFeed(AssetPublishFeedOperation),
    AssetClaimFees(AssetClaimFeesOperation),
    CallOrderUpdate(CallOrderUpdateOperation),

    // virtual
    FillOrder(FillOrderOperation),
    FillAssetOrder(FillAssetOrderOperation),
    FillConvertRequest(FillConvertRequestOperation),
    FillVestingWithdraw(FillVestingWithdrawOperation),
    FillTransferFromSavings(FillTransferFromSavingsOperation),
    AuthorReward(AuthorRewardOperation),
    CurationReward(CurationRewardOperation),
    CommentReward(CommentRewardOperation),
    CommentBenefactorReward(CommentBenefactorRewardOperation),
    CommentPayoutUpdate(CommentPayoutUpdateOperation),
    LiquidityReward(LiquidityRewardOperation),
    Interest(InterestOperation),
    WitnessShutdown(WitnessShutdownOperation),
    ReturnVestingDelegation(ReturnVestingDelegationOperation),
    Hardfork(HardforkOperation),
    AssetSettleCancel(AssetSettleCancelOperation),
}

impl Operation {
    /// Virtual operations are emitted by the chain and rejected inside
    /// transactions.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            Operation::FillOrder(_)
                | Operation::FillAssetOrder(_)
                | Operation::FillConvertRequest(_)
                | Operation::FillVestingWithdraw(_)
                | Operation::FillTransferFromSavings(_)
                | Operation::AuthorReward(_)
                | Operation::CurationReward(_)
                | Operation::CommentReward(_)
                | Operation::CommentBenefactorReward(_)
                | Operation::CommentPayoutUpdate(_)
                | Operation::LiquidityReward(_)
                | Operation::Interest(_)
                | Operation::WitnessShutdown(_)
                | Operation::ReturnVestingDelegation(_)
                | Operation::Hardfork(_)
                | Operation::AssetSettleCancel(_)
        )
    }

    /// Market operations draw on the market bandwidth class
    #[must_use]
    pub fn is_market(&self) -> bool {
        matches!(
            self,
            Operation::Convert(_)
                | Operation::LimitOrderCreate(_)
                | Operation::LimitOrderCreate2(_)
                | Operation::LimitOrderCancel(_)
                | Operation::CallOrderUpdate(_)
                | Operation::AssetSettle(_)
                | Operation::AssetForceSettle(_)
                | Operation::Transfer(_)
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Operation::Vote(op) => {
                check_account_name(&op.voter)?;
                check_account_name(&op.author)?;
                check_permlink(&op.permlink)?;
                check(op.weight.unsigned_abs() <= PERCENT_100, "weight out of range")
            }
            Operation::Comment(op) => {
                check_account_name(&op.author)?;
                check_permlink(&op.permlink)?;
                if !op.parent_author.is_empty() {
                    check_account_name(&op.parent_author)?;
                    check_permlink(&op.parent_permlink)?;
                } else {
                    check_permlink(&op.parent_permlink)?;
                }
                check(!op.body.is_empty(), "body is empty")
            }
            Operation::CommentOptions(op) => {
                check_account_name(&op.author)?;
                check_permlink(&op.permlink)?;
                check(
                    op.max_accepted_payout.symbol == ABD && op.max_accepted_payout.amount >= 0,
                    "max accepted payout must be non-negative ABD",
                )?;
                check(
                    op.percent_amaranth_dollars <= PERCENT_100,
                    "stable percent out of range",
                )?;
                for ext in &op.extensions {
                    let CommentOptionsExtension::BeneficiaryRoutes(routes) = ext;
                    let mut total: u32 = 0;
                    let mut last: Option<&str> = None;
                    for route in routes {
                        check_account_name(&route.account)?;
                        check(
                            last.map_or(true, |prev| prev < route.account.as_str()),
                            "beneficiaries must be unique and sorted",
                        )?;
                        last = Some(&route.account);
                        total += u32::from(route.weight);
                    }
                    check(total <= u32::from(PERCENT_100), "beneficiaries exceed 100%")?;
                }
                Ok(())
            }
            Operation::DeleteComment(op) => {
                check_account_name(&op.author)?;
                check_permlink(&op.permlink)
            }
            Operation::Transfer(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check_memo(&op.memo)?;
                check(op.amount.amount > 0, "transfer amount must be positive")?;
                check(op.amount.symbol != VESTS, "cannot transfer vesting shares")
            }
            Operation::TransferToVesting(op) => {
                check_account_name(&op.from)?;
                if !op.to.is_empty() {
                    check_account_name(&op.to)?;
                }
                check(
                    op.amount.symbol == AMA && op.amount.amount > 0,
                    "must vest a positive AMA amount",
                )
            }
            Operation::WithdrawVesting(op) => {
                check_account_name(&op.account)?;
                check(
                    op.vesting_shares.symbol == VESTS && op.vesting_shares.amount >= 0,
                    "withdrawal must be non-negative VESTS",
                )
            }
            Operation::SetWithdrawVestingRoute(op) => {
                check_account_name(&op.from_account)?;
                check_account_name(&op.to_account)?;
                check(op.percent <= PERCENT_100, "route percent out of range")
            }
            Operation::AccountCreate(op) => {
                check_account_name(&op.creator)?;
                check_account_name(&op.new_account_name)?;
                check(
                    op.fee.symbol == AMA && op.fee.amount >= 0,
                    "fee must be non-negative AMA",
                )?;
                op.owner.validate().map_err(|_| ValidationError::Invalid("bad owner authority"))?;
                op.active.validate().map_err(|_| ValidationError::Invalid("bad active authority"))?;
                op.posting
                    .validate()
                    .map_err(|_| ValidationError::Invalid("bad posting authority"))
            }
            Operation::AccountCreateWithDelegation(op) => {
                check_account_name(&op.creator)?;
                check_account_name(&op.new_account_name)?;
                check(
                    op.fee.symbol == AMA && op.fee.amount >= 0,
                    "fee must be non-negative AMA",
                )?;
                check(
                    op.delegation.symbol == VESTS && op.delegation.amount >= 0,
                    "delegation must be non-negative VESTS",
                )
            }
            Operation::AccountUpdate(op) => {
                check_account_name(&op.account)?;
                for auth in [&op.owner, &op.active, &op.posting].into_iter().flatten() {
                    auth.validate()
                        .map_err(|_| ValidationError::Invalid("bad authority"))?;
                }
                Ok(())
            }
            Operation::WitnessUpdate(op) => {
                check_account_name(&op.owner)?;
                check(op.url.len() <= MAX_MEMO_SIZE, "url too long")?;
                op.props.validate()
            }
            Operation::AccountWitnessVote(op) => {
                check_account_name(&op.account)?;
                check_account_name(&op.witness)
            }
            Operation::AccountWitnessProxy(op) => {
                check_account_name(&op.account)?;
                if !op.proxy.is_empty() {
                    check_account_name(&op.proxy)?;
                }
                check(op.proxy != op.account, "cannot proxy to self")
            }
            Operation::Custom(op) => check(!op.required_auths.is_empty(), "no required auths"),
            Operation::CustomBinary(op) => {
                for auth in &op.required_auths {
                    auth.validate()
                        .map_err(|_| ValidationError::Invalid("bad authority"))?;
                }
                check(!op.id.is_empty(), "custom id is empty")
            }
            Operation::CustomJson(op) => {
                check(
                    !op.required_auths.is_empty() || !op.required_posting_auths.is_empty(),
                    "no required auths",
                )?;
                check(op.id.len() <= 32, "custom id too long")
            }
            Operation::Pow(op) => check_account_name(&op.worker_account),
            Operation::Pow2(op) => check_account_name(&op.worker_account),
            Operation::ReportOverProduction(op) => {
                check_account_name(&op.reporter)?;
                check(
                    op.first_block.witness == op.second_block.witness,
                    "blocks signed by different witnesses",
                )?;
                check(
                    op.first_block.timestamp == op.second_block.timestamp,
                    "blocks at different timestamps",
                )?;
                check(op.first_block != op.second_block, "blocks are identical")
            }
            Operation::FeedPublish(op) => {
                check_account_name(&op.publisher)?;
                op.exchange_rate
                    .validate()
                    .map_err(|_| ValidationError::Invalid("bad price"))?;
                let pair = (op.exchange_rate.base.symbol, op.exchange_rate.quote.symbol);
                check(
                    pair == (ABD, AMA) || pair == (AMA, ABD),
                    "feed must price ABD against AMA",
                )
            }
            Operation::Convert(op) => {
                check_account_name(&op.owner)?;
                check(
                    op.amount.symbol == ABD && op.amount.amount > 0,
                    "can only convert a positive ABD amount",
                )
            }
            Operation::LimitOrderCreate(op) => {
                check_account_name(&op.owner)?;
                check(op.amount_to_sell.amount > 0, "nothing for sale")?;
                check(op.min_to_receive.amount > 0, "nothing to receive")?;
                check(
                    op.amount_to_sell.symbol != op.min_to_receive.symbol,
                    "cannot trade an asset against itself",
                )?;
                check(
                    op.amount_to_sell.symbol != VESTS && op.min_to_receive.symbol != VESTS,
                    "vesting shares are not tradeable",
                )
            }
            Operation::LimitOrderCreate2(op) => {
                check_account_name(&op.owner)?;
                check(op.amount_to_sell.amount > 0, "nothing for sale")?;
                op.exchange_rate
                    .validate()
                    .map_err(|_| ValidationError::Invalid("bad price"))?;
                check(
                    op.amount_to_sell.symbol == op.exchange_rate.base.symbol,
                    "sell asset must be the price base",
                )
            }
            Operation::LimitOrderCancel(op) => check_account_name(&op.owner),
            Operation::ChallengeAuthority(op) => {
                check_account_name(&op.challenger)?;
                check_account_name(&op.challenged)?;
                check(op.challenger != op.challenged, "cannot challenge yourself")
            }
            Operation::ProveAuthority(op) => check_account_name(&op.challenged),
            Operation::RequestAccountRecovery(op) => {
                check_account_name(&op.recovery_account)?;
                check_account_name(&op.account_to_recover)
            }
            Operation::RecoverAccount(op) => {
                check_account_name(&op.account_to_recover)?;
                check(
                    op.new_owner_authority != op.recent_owner_authority,
                    "new owner authority must change",
                )?;
                check(
                    !op.new_owner_authority.is_impossible()
                        && !op.recent_owner_authority.is_impossible(),
                    "impossible authority",
                )
            }
            Operation::ChangeRecoveryAccount(op) => {
                check_account_name(&op.account_to_recover)?;
                check_account_name(&op.new_recovery_account)
            }
            Operation::EscrowTransfer(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check_account_name(&op.agent)?;
                check(
                    op.abd_amount.symbol == ABD && op.abd_amount.amount >= 0,
                    "escrow ABD leg invalid",
                )?;
                check(
                    op.ama_amount.symbol == AMA && op.ama_amount.amount >= 0,
                    "escrow AMA leg invalid",
                )?;
                check(
                    op.abd_amount.amount > 0 || op.ama_amount.amount > 0,
                    "escrow is empty",
                )?;
                check(op.fee.amount >= 0, "negative escrow fee")?;
                check(
                    op.from != op.agent && op.to != op.agent,
                    "agent must be a third party",
                )?;
                check(
                    op.ratification_deadline < op.escrow_expiration,
                    "ratification deadline after expiration",
                )
            }
            Operation::EscrowApprove(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check_account_name(&op.agent)?;
                check(
                    op.who == op.to || op.who == op.agent,
                    "only to or agent may approve",
                )
            }
            Operation::EscrowDispute(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check(
                    op.who == op.from || op.who == op.to,
                    "only from or to may dispute",
                )
            }
            Operation::EscrowRelease(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check(
                    op.abd_amount.amount >= 0
                        && op.ama_amount.amount >= 0
                        && (op.abd_amount.amount > 0 || op.ama_amount.amount > 0),
                    "nothing to release",
                )?;
                check(
                    op.receiver == op.from || op.receiver == op.to,
                    "funds release to from or to only",
                )
            }
            Operation::TransferToSavings(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check_memo(&op.memo)?;
                check(op.amount.amount > 0, "amount must be positive")?;
                check(
                    op.amount.symbol == AMA || op.amount.symbol == ABD,
                    "savings hold AMA and ABD only",
                )
            }
            Operation::TransferFromSavings(op) => {
                check_account_name(&op.from)?;
                check_account_name(&op.to)?;
                check_memo(&op.memo)?;
                check(op.amount.amount > 0, "amount must be positive")?;
                check(
                    op.amount.symbol == AMA || op.amount.symbol == ABD,
                    "savings hold AMA and ABD only",
                )
            }
            Operation::CancelTransferFromSavings(op) => check_account_name(&op.from),
            Operation::DeclineVotingRights(op) => check_account_name(&op.account),
            Operation::ResetAccount(op) => {
                check_account_name(&op.reset_account)?;
                check_account_name(&op.account_to_reset)?;
                check(
                    !op.new_owner_authority.is_impossible(),
                    "impossible authority",
                )
            }
            Operation::SetResetAccount(op) => {
                check_account_name(&op.account)?;
                check_account_name(&op.reset_account)?;
                check(
                    op.current_reset_account != op.reset_account,
                    "reset account unchanged",
                )
            }
            Operation::DelegateVestingShares(op) => {
                check_account_name(&op.delegator)?;
                check_account_name(&op.delegatee)?;
                check(op.delegator != op.delegatee, "cannot delegate to self")?;
                check(
                    op.vesting_shares.symbol == VESTS && op.vesting_shares.amount >= 0,
                    "delegation must be non-negative VESTS",
                )
            }
            Operation::AssetCreate(op) => {
                check_account_name(&op.issuer)?;
                Symbol::parse(&op.symbol, op.precision)
                    .map_err(|_| ValidationError::Invalid("bad symbol"))?;
                op.common_options.validate()?;
                if op.is_prediction_market {
                    check(op.bitasset_options.is_some(), "prediction market needs bitasset options")?;
                }
                Ok(())
            }
            Operation::AssetIssue(op) => {
                check_account_name(&op.issuer)?;
                check_account_name(&op.issue_to_account)?;
                check_memo(&op.memo)?;
                check(op.asset_to_issue.amount > 0, "must issue a positive amount")
            }
            Operation::AssetReserve(op) => {
                check_account_name(&op.payer)?;
                check(op.amount_to_reserve.amount > 0, "must reserve a positive amount")
            }
            Operation::AssetUpdate(op) => {
                check_account_name(&op.issuer)?;
                if let Some(new_issuer) = &op.new_issuer {
                    check_account_name(new_issuer)?;
                }
                op.new_options.validate()
            }
            Operation::AssetUpdateBitasset(op) => {
                check_account_name(&op.issuer)?;
                check(op.new_options.minimum_feeds > 0, "minimum feeds is zero")
            }
            Operation::AssetUpdateFeedProducers(op) => {
                check_account_name(&op.issuer)?;
                for name in &op.new_feed_producers {
                    check_account_name(name)?;
                }
                Ok(())
            }
            Operation::AssetFundFeePool(op) => {
                check_account_name(&op.from_account)?;
                check(
                    op.amount.symbol == AMA && op.amount.amount > 0,
                    "fee pools are funded in AMA",
                )
            }
            Operation::AssetGlobalSettle(op) => {
                check_account_name(&op.issuer)?;
                op.settle_price
                    .validate()
                    .map_err(|_| ValidationError::Invalid("bad price"))?;
                check(
                    op.settle_price.base.symbol == op.asset_to_settle,
                    "price must be quoted in the settled asset",
                )
            }
            Operation::AssetSettle(op) => {
                check_account_name(&op.account)?;
                check(op.amount.amount > 0, "must settle a positive amount")
            }
            Operation::AssetForceSettle(op) => {
                check_account_name(&op.account)?;
                check(op.amount.amount > 0, "must settle a positive amount")
            }
            Operation::AssetPublishFeed(op) => {
                check_account_name(&op.publisher)?;
                if !op.feed.is_null() {
                    op.feed
                        .settlement_price
                        .validate()
                        .map_err(|_| ValidationError::Invalid("bad feed price"))?;
                    check(
                        op.feed.settlement_price.base.symbol == op.asset,
                        "feed must be quoted in the fed asset",
                    )?;
                }
                check(
                    op.feed.maximum_short_squeeze_ratio >= 1_000
                        || op.feed.is_null(),
                    "short squeeze ratio below 1",
                )
            }
            Operation::AssetClaimFees(op) => {
                check_account_name(&op.issuer)?;
                check(op.amount_to_claim.amount > 0, "must claim a positive amount")
            }
            Operation::CallOrderUpdate(op) => {
                check_account_name(&op.funding_account)?;
                check(
                    op.delta_collateral.symbol != op.delta_debt.symbol,
                    "collateral and debt must differ",
                )?;
                check(
                    op.delta_collateral.amount != 0 || op.delta_debt.amount != 0,
                    "empty call update",
                )
            }
            // Virtual operations never validate inside a transaction
            _ => Err(ValidationError::Invalid("virtual operation in transaction")),
        }
    }

    /// Accumulate the authority classes this operation demands
    pub fn get_required_authorities(&self, req: &mut RequiredAuthorities) {
        match self {
            Operation::Vote(op) => {
                req.posting.insert(op.voter.clone());
            }
            Operation::Comment(op) => {
                req.posting.insert(op.author.clone());
            }
            Operation::CommentOptions(op) => {
                req.posting.insert(op.author.clone());
            }
            Operation::DeleteComment(op) => {
                req.posting.insert(op.author.clone());
            }
            Operation::Transfer(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::TransferToVesting(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::WithdrawVesting(op) => {
                req.active.insert(op.account.clone());
            }
            Operation::SetWithdrawVestingRoute(op) => {
                req.active.insert(op.from_account.clone());
            }
            Operation::AccountCreate(op) => {
                req.active.insert(op.creator.clone());
            }
            Operation::AccountCreateWithDelegation(op) => {
                req.active.insert(op.creator.clone());
            }
            Operation::AccountUpdate(op) => {
                if op.owner.is_some() {
                    req.owner.insert(op.account.clone());
                } else {
                    req.active.insert(op.account.clone());
                }
            }
            Operation::WitnessUpdate(op) => {
                req.active.insert(op.owner.clone());
            }
            Operation::AccountWitnessVote(op) => {
                req.active.insert(op.account.clone());
            }
            Operation::AccountWitnessProxy(op) => {
                req.active.insert(op.account.clone());
            }
            Operation::Custom(op) => {
                for account in &op.required_auths {
                    req.active.insert(account.clone());
                }
            }
            Operation::CustomBinary(op) => {
                for account in &op.required_owner_auths {
                    req.owner.insert(account.clone());
                }
                for account in &op.required_active_auths {
                    req.active.insert(account.clone());
                }
                for account in &op.required_posting_auths {
                    req.posting.insert(account.clone());
                }
                req.other.extend(op.required_auths.iter().cloned());
            }
            Operation::CustomJson(op) => {
                for account in &op.required_auths {
                    req.active.insert(account.clone());
                }
                for account in &op.required_posting_auths {
                    req.posting.insert(account.clone());
                }
            }
            Operation::Pow(op) => {
                // A miner may not yet have an account; work itself authorizes
                if !op.worker_account.is_empty() {
                    req.active.insert(op.worker_account.clone());
                }
            }
            Operation::Pow2(op) => {
                if !op.worker_account.is_empty() {
                    req.active.insert(op.worker_account.clone());
                }
            }
            Operation::ReportOverProduction(_) => {}
            Operation::FeedPublish(op) => {
                req.active.insert(op.publisher.clone());
            }
            Operation::Convert(op) => {
                req.active.insert(op.owner.clone());
            }
            Operation::LimitOrderCreate(op) => {
                req.active.insert(op.owner.clone());
            }
            Operation::LimitOrderCreate2(op) => {
                req.active.insert(op.owner.clone());
            }
            Operation::LimitOrderCancel(op) => {
                req.active.insert(op.owner.clone());
            }
            Operation::ChallengeAuthority(op) => {
                req.active.insert(op.challenger.clone());
            }
            Operation::ProveAuthority(op) => {
                if op.require_owner {
                    req.owner.insert(op.challenged.clone());
                } else {
                    req.active.insert(op.challenged.clone());
                }
            }
            Operation::RequestAccountRecovery(op) => {
                req.active.insert(op.recovery_account.clone());
            }
            Operation::RecoverAccount(op) => {
                req.other.push(op.new_owner_authority.clone());
                req.other.push(op.recent_owner_authority.clone());
            }
            Operation::ChangeRecoveryAccount(op) => {
                req.owner.insert(op.account_to_recover.clone());
            }
            Operation::EscrowTransfer(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::EscrowApprove(op) => {
                req.active.insert(op.who.clone());
            }
            Operation::EscrowDispute(op) => {
                req.active.insert(op.who.clone());
            }
            Operation::EscrowRelease(op) => {
                req.active.insert(op.who.clone());
            }
            Operation::TransferToSavings(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::TransferFromSavings(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::CancelTransferFromSavings(op) => {
                req.active.insert(op.from.clone());
            }
            Operation::DeclineVotingRights(op) => {
                req.owner.insert(op.account.clone());
            }
            Operation::ResetAccount(op) => {
                req.active.insert(op.reset_account.clone());
            }
            Operation::SetResetAccount(op) => {
                req.owner.insert(op.account.clone());
            }
            Operation::DelegateVestingShares(op) => {
                req.active.insert(op.delegator.clone());
            }
            Operation::AssetCreate(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetIssue(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetReserve(op) => {
                req.active.insert(op.payer.clone());
            }
            Operation::AssetUpdate(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetUpdateBitasset(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetUpdateFeedProducers(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetFundFeePool(op) => {
                req.active.insert(op.from_account.clone());
            }
            Operation::AssetGlobalSettle(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::AssetSettle(op) => {
                req.active.insert(op.account.clone());
            }
            Operation::AssetForceSettle(op) => {
                req.active.insert(op.account.clone());
            }
            Operation::AssetPublishFeed(op) => {
                req.active.insert(op.publisher.clone());
            }
            Operation::AssetClaimFees(op) => {
                req.active.insert(op.issuer.clone());
            }
            Operation::CallOrderUpdate(op) => {
                req.active.insert(op.funding_account.clone());
            }
            // virtual operations require nothing
            _ => {}
        }
    }
}

/// Block header extensions carried by producing witnesses
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub enum BlockHeaderExtension {
    /// The binary version the witness runs
    Version(ProtocolVersion),
    /// The witness's vote for the next hardfork
    HardforkVote(HardforkVersionVote),
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Encode, Decode)]
pub struct HardforkVersionVote {
    pub version: ProtocolVersion,
    pub time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_validates_account_names() {
        assert!(is_valid_account_name("alice"));
        assert!(is_valid_account_name("alice-2"));
        assert!(!is_valid_account_name("al"));
        assert!(!is_valid_account_name("Alice"));
        assert!(!is_valid_account_name("alice-"));
        assert!(!is_valid_account_name("3lice"));
        assert!(!is_valid_account_name("a-very-long-account-name"));
    }

    #[test]
    fn transfer_validation() {
        let mut op = TransferOperation {
            from: "alice".into(),
            to: "bob".into(),
            amount: Asset::new(10_000, AMA),
            memo: String::new(),
        };
        assert!(Operation::Transfer(op.clone()).validate().is_ok());

        op.amount = Asset::new(0, AMA);
        assert!(Operation::Transfer(op.clone()).validate().is_err());

        op.amount = Asset::new(10, VESTS);
        assert!(Operation::Transfer(op).validate().is_err());
    }

    #[test]
    fn virtual_operations_are_rejected_in_transactions() {
        let op = Operation::Hardfork(HardforkOperation { hardfork_id: 1 });
        assert!(op.is_virtual());
        assert!(op.validate().is_err());
    }

    #[test]
    fn vote_requires_posting_authority() {
        let op = Operation::Vote(VoteOperation {
            voter: "alice".into(),
            author: "bob".into(),
            permlink: "post".into(),
            weight: PERCENT_100 as i16,
        });
        let mut req = RequiredAuthorities::default();
        op.get_required_authorities(&mut req);
        assert!(req.posting.contains("alice"));
        assert!(req.active.is_empty());
    }

    #[test]
    fn beneficiary_routes_must_be_sorted() {
        let mk = |routes: Vec<BeneficiaryRoute>| {
            Operation::CommentOptions(CommentOptionsOperation {
                author: "carol".into(),
                permlink: "post".into(),
                max_accepted_payout: Asset::new(1_000_000_000, ABD),
                percent_amaranth_dollars: PERCENT_100,
                allow_votes: true,
                allow_curation_rewards: true,
                extensions: vec![CommentOptionsExtension::BeneficiaryRoutes(routes)],
            })
        };

        let sorted = mk(vec![
            BeneficiaryRoute {
                account: "alice".into(),
                weight: 100,
            },
            BeneficiaryRoute {
                account: "bob".into(),
                weight: 100,
            },
        ]);
        assert!(sorted.validate().is_ok());

        let unsorted = mk(vec![
            BeneficiaryRoute {
                account: "bob".into(),
                weight: 100,
            },
            BeneficiaryRoute {
                account: "alice".into(),
                weight: 100,
            },
        ]);
        assert!(unsorted.validate().is_err());
    }
}
