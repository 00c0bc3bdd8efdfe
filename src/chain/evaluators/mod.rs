// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Operation dispatch: every transaction payload routes to its evaluator,
//! which validates preconditions against head state and mutates the store.

mod account;
mod asset;
mod content;
mod custom;
mod market;
mod transfer;
mod witness;

use crate::chain::chain::{Chain, ChainError, ChainResult};
use crate::primitives::Operation;

pub(crate) fn apply(chain: &mut Chain, op: &Operation) -> ChainResult<()> {
    match op {
        Operation::Vote(op) => content::apply_vote(chain, op),
        Operation::Comment(op) => content::apply_comment(chain, op),
        Operation::CommentOptions(op) => content::apply_comment_options(chain, op),
        Operation::DeleteComment(op) => content::apply_delete_comment(chain, op),

        Operation::Transfer(op) => transfer::apply_transfer(chain, op),
        Operation::TransferToVesting(op) => transfer::apply_transfer_to_vesting(chain, op),
        Operation::WithdrawVesting(op) => transfer::apply_withdraw_vesting(chain, op),
        Operation::SetWithdrawVestingRoute(op) => {
            transfer::apply_set_withdraw_vesting_route(chain, op)
        }
        Operation::TransferToSavings(op) => transfer::apply_transfer_to_savings(chain, op),
        Operation::TransferFromSavings(op) => transfer::apply_transfer_from_savings(chain, op),
        Operation::CancelTransferFromSavings(op) => {
            transfer::apply_cancel_transfer_from_savings(chain, op)
        }
        Operation::EscrowTransfer(op) => transfer::apply_escrow_transfer(chain, op),
        Operation::EscrowApprove(op) => transfer::apply_escrow_approve(chain, op),
        Operation::EscrowDispute(op) => transfer::apply_escrow_dispute(chain, op),
        Operation::EscrowRelease(op) => transfer::apply_escrow_release(chain, op),
        Operation::DelegateVestingShares(op) => {
            transfer::apply_delegate_vesting_shares(chain, op)
        }

        Operation::AccountCreate(op) => account::apply_account_create(chain, op),
        Operation::AccountCreateWithDelegation(op) => {
            account::apply_account_create_with_delegation(chain, op)
        }
        Operation::AccountUpdate(op) => account::apply_account_update(chain, op),
        Operation::ChallengeAuthority(op) => account::apply_challenge_authority(chain, op),
        Operation::ProveAuthority(op) => account::apply_prove_authority(chain, op),
        Operation::RequestAccountRecovery(op) => {
            account::apply_request_account_recovery(chain, op)
        }
        Operation::RecoverAccount(op) => account::apply_recover_account(chain, op),
        Operation::ChangeRecoveryAccount(op) => {
            account::apply_change_recovery_account(chain, op)
        }
        Operation::DeclineVotingRights(op) => account::apply_decline_voting_rights(chain, op),
        Operation::ResetAccount(op) => account::apply_reset_account(chain, op),
        Operation::SetResetAccount(op) => account::apply_set_reset_account(chain, op),

        Operation::WitnessUpdate(op) => witness::apply_witness_update(chain, op),
        Operation::AccountWitnessVote(op) => witness::apply_account_witness_vote(chain, op),
        Operation::AccountWitnessProxy(op) => witness::apply_account_witness_proxy(chain, op),
        Operation::FeedPublish(op) => witness::apply_feed_publish(chain, op),
        Operation::Pow(op) => witness::apply_pow(chain, op),
        Operation::Pow2(op) => witness::apply_pow2(chain, op),
        Operation::ReportOverProduction(op) => {
            witness::apply_report_over_production(chain, op)
        }

        Operation::Convert(op) => market::apply_convert(chain, op),
        Operation::LimitOrderCreate(op) => market::apply_limit_order_create(chain, op),
        Operation::LimitOrderCreate2(op) => market::apply_limit_order_create2(chain, op),
        Operation::LimitOrderCancel(op) => market::apply_limit_order_cancel(chain, op),
        Operation::CallOrderUpdate(op) => market::apply_call_order_update(chain, op),

        Operation::AssetCreate(op) => asset::apply_asset_create(chain, op),
        Operation::AssetIssue(op) => asset::apply_asset_issue(chain, op),
        Operation::AssetReserve(op) => asset::apply_asset_reserve(chain, op),
        Operation::AssetUpdate(op) => asset::apply_asset_update(chain, op),
        Operation::AssetUpdateBitasset(op) => asset::apply_asset_update_bitasset(chain, op),
        Operation::AssetUpdateFeedProducers(op) => {
            asset::apply_asset_update_feed_producers(chain, op)
        }
        Operation::AssetFundFeePool(op) => asset::apply_asset_fund_fee_pool(chain, op),
        Operation::AssetGlobalSettle(op) => asset::apply_asset_global_settle(chain, op),
        Operation::AssetSettle(op) => asset::apply_asset_settle(chain, op),
        Operation::AssetForceSettle(op) => asset::apply_asset_force_settle(chain, op),
        Operation::AssetPublishFeed(op) => asset::apply_asset_publish_feed(chain, op),
        Operation::AssetClaimFees(op) => asset::apply_asset_claim_fees(chain, op),

        Operation::Custom(op) => custom::apply_custom(chain, op),
        Operation::CustomBinary(op) => custom::apply_custom_binary(chain, op),
        Operation::CustomJson(op) => custom::apply_custom_json(chain, op),

        _ => Err(ChainError::Protocol(
            "virtual operation inside a transaction".into(),
        )),
    }
}
