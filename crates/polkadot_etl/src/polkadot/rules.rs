//! Event rule table: who paid whom, and which data slots hold the amounts.
//!
//! Each allow-listed event type maps to a pure function over the event's
//! positional data and the surrounding extrinsic. Rules only pick identities
//! and slot indices; amount decoding and decimal scaling happen in
//! [`crate::polkadot::normalize`].

use crate::polkadot::block::{value_as_address, MethodId};
use crate::polkadot::transfer::TransferType;
use serde_json::Value;
use thiserror::Error;

/// What a rule may look at besides the event data.
#[derive(Clone, Copy, Debug)]
pub struct RuleContext<'a> {
    pub success: bool,
    pub block_height: u64,
    pub author: Option<&'a str>,
    pub signer: Option<&'a str>,
    pub treasury: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleOutcome {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    /// Data slot holding the moved amount; `None` means zero.
    pub value_index: Option<usize>,
    /// Data slot holding the fee; `None` means zero.
    pub fee_index: Option<usize>,
    pub kind: TransferType,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("data[{index}] is missing or not an address")]
    BadAddress { index: usize },
}

pub type RuleFn = fn(&[Value], &RuleContext<'_>) -> Result<RuleOutcome, RuleError>;

pub struct Rule {
    pub pallet: &'static str,
    pub method: &'static str,
    /// A failed extrinsic moves no value for this event type.
    pub gated: bool,
    pub apply: RuleFn,
}

impl Rule {
    pub fn matches(&self, event: &MethodId) -> bool {
        self.pallet == event.pallet && self.method == event.method
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        pallet: "balances",
        method: "Transfer",
        gated: true,
        apply: balance_transfer,
    },
    Rule {
        pallet: "treasury",
        method: "Deposit",
        gated: false,
        apply: treasury_deposit,
    },
    Rule {
        pallet: "staking",
        method: "Reward",
        gated: true,
        apply: staking_reward,
    },
    Rule {
        pallet: "staking",
        method: "Rewarded",
        gated: true,
        apply: staking_reward,
    },
    Rule {
        pallet: "claims",
        method: "Claimed",
        gated: true,
        apply: claims_claimed,
    },
    Rule {
        pallet: "identity",
        method: "SubIdentityAdded",
        gated: true,
        apply: account_to_account,
    },
    Rule {
        pallet: "identity",
        method: "SubIdentityRemoved",
        gated: true,
        apply: account_to_account,
    },
    Rule {
        pallet: "identity",
        method: "SubIdentityRevoked",
        gated: true,
        apply: account_to_account,
    },
    Rule {
        pallet: "balances",
        method: "ReserveRepatriated",
        gated: true,
        apply: account_to_account,
    },
    Rule {
        pallet: "balances",
        method: "Slashed",
        gated: false,
        apply: balance_slashed,
    },
    Rule {
        pallet: "balances",
        method: "DustLost",
        gated: false,
        apply: dust_lost,
    },
    Rule {
        pallet: "balances",
        method: "BalanceSet",
        gated: false,
        apply: balance_set,
    },
    Rule {
        pallet: "balances",
        method: "Deposit",
        gated: false,
        apply: balance_deposit,
    },
];

pub fn rule_for(event: &MethodId) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.matches(event))
}

fn address(data: &[Value], index: usize) -> Result<String, RuleError> {
    data.get(index)
        .and_then(value_as_address)
        .map(str::to_string)
        .ok_or(RuleError::BadAddress { index })
}

fn signer(ctx: &RuleContext<'_>) -> Option<String> {
    ctx.signer.map(str::to_string)
}

// [from, to, amount]; the signer is the payer.
fn balance_transfer(data: &[Value], ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: signer(ctx),
        receiver: Some(address(data, 1)?),
        value_index: Some(2),
        fee_index: None,
        kind: TransferType::Normal,
    })
}

// [value]
fn treasury_deposit(_data: &[Value], ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: signer(ctx),
        receiver: Some(ctx.treasury.to_string()),
        value_index: None,
        fee_index: Some(0),
        kind: TransferType::Fee,
    })
}

// [stash, amount]
fn staking_reward(data: &[Value], _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: None,
        receiver: Some(address(data, 0)?),
        value_index: Some(1),
        fee_index: None,
        kind: TransferType::NoSender,
    })
}

// [who, ethereum_address, amount]
fn claims_claimed(data: &[Value], _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: None,
        receiver: Some(address(data, 0)?),
        value_index: Some(2),
        fee_index: None,
        kind: TransferType::NoSender,
    })
}

// [from, to, amount, ..]
fn account_to_account(data: &[Value], _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: Some(address(data, 0)?),
        receiver: Some(address(data, 1)?),
        value_index: Some(2),
        fee_index: None,
        kind: TransferType::Normal,
    })
}

// [who, amount]; slashed funds go to the treasury.
fn balance_slashed(data: &[Value], ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: Some(address(data, 0)?),
        receiver: Some(ctx.treasury.to_string()),
        value_index: Some(1),
        fee_index: None,
        kind: TransferType::Normal,
    })
}

// [account, amount]
fn dust_lost(data: &[Value], _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: Some(address(data, 0)?),
        receiver: None,
        value_index: Some(1),
        fee_index: None,
        kind: TransferType::NoReceiver,
    })
}

// [who, free, ..]
fn balance_set(data: &[Value], _ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    Ok(RuleOutcome {
        sender: None,
        receiver: Some(address(data, 0)?),
        value_index: Some(1),
        fee_index: None,
        kind: TransferType::BalancesSetByRoot,
    })
}

// [who, amount]. A deposit to the block author, the signer itself or the
// treasury is the fee split of the extrinsic; anything else is an incoming
// deposit with no on-chain sender.
fn balance_deposit(data: &[Value], ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
    let who = address(data, 0)?;
    let is_fee = ctx.author == Some(who.as_str())
        || ctx.signer == Some(who.as_str())
        || ctx.treasury == who;
    if is_fee {
        Ok(RuleOutcome {
            sender: signer(ctx),
            receiver: Some(who),
            value_index: None,
            fee_index: Some(1),
            kind: TransferType::Fee,
        })
    } else {
        Ok(RuleOutcome {
            sender: None,
            receiver: Some(who),
            value_index: Some(1),
            fee_index: None,
            kind: TransferType::NoSender,
        })
    }
}
