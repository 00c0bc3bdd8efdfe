// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Custom operations carry opaque payloads for off-chain consumers. The
//! core only verifies the named accounts exist; derived-index observers
//! interpret the payloads.

use crate::chain::chain::{Chain, ChainResult};
use crate::primitives::*;

pub(super) fn apply_custom(chain: &mut Chain, op: &CustomOperation) -> ChainResult<()> {
    for account in &op.required_auths {
        chain.get_account_id(account)?;
    }
    Ok(())
}

pub(super) fn apply_custom_binary(
    chain: &mut Chain,
    op: &CustomBinaryOperation,
) -> ChainResult<()> {
    for account in op
        .required_owner_auths
        .iter()
        .chain(&op.required_active_auths)
        .chain(&op.required_posting_auths)
    {
        chain.get_account_id(account)?;
    }
    Ok(())
}

pub(super) fn apply_custom_json(chain: &mut Chain, op: &CustomJsonOperation) -> ChainResult<()> {
    for account in op.required_auths.iter().chain(&op.required_posting_auths) {
        chain.get_account_id(account)?;
    }
    Ok(())
}
