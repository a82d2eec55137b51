use std::collections::HashSet;

use super::ScanMode;
use crate::{
    pos_index::Classification,
    store::{BlockEffects, IdentitySighting},
    types::{Block, Spend, StakingReward, Transaction, TxOutput, Utxo},
};

/// Addresses and identities whose activity is indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tracking {
    all: bool,
    addresses: HashSet<String>,
    identities: HashSet<String>,
}

impl Tracking {
    /// Every address, and every identity address, is tracked.
    #[must_use]
    pub fn all() -> Self {
        Self { all: true, ..Self::default() }
    }

    #[must_use]
    pub fn addresses(addresses: impl IntoIterator<Item = String>) -> Self {
        Self { all: false, addresses: addresses.into_iter().collect(), identities: HashSet::new() }
    }

    /// Tracks an identity's own address for UTXOs and staking rewards.
    pub fn track_identity(&mut self, address: String) {
        self.identities.insert(address);
    }

    #[must_use]
    pub fn tracks_address(&self, address: &str) -> bool {
        self.all || self.addresses.contains(address) || self.identities.contains(address)
    }

    /// Identity addresses on Verus start with `i`.
    #[must_use]
    pub fn tracks_identity(&self, address: &str) -> bool {
        self.identities.contains(address) || (self.all && address.starts_with('i'))
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }
}

/// The output of a stake block's reward transaction that receives the reward.
///
/// The reward transaction is the block's first transaction; the payout is its first
/// output with a positive value paying exactly one address.
#[must_use]
pub fn reward_payout(block: &Block) -> Option<(&Transaction, &TxOutput)> {
    let reward_tx = block.transactions().next()?;
    let payout = reward_tx
        .vout
        .iter()
        .find(|output| output.amount_sats() > 0 && output.sole_address().is_some())?;
    Some((reward_tx, payout))
}

/// Address whose stake produced the block: the first input of the coinstake.
///
/// The coinstake is the first coinstake-shaped transaction, otherwise the last
/// non-coinbase transaction. `None` when the node did not embed the input address.
#[must_use]
pub fn staking_source(block: &Block) -> Option<&str> {
    let stake_tx = block
        .transactions()
        .find(|tx| tx.is_coinstake_shaped())
        .or_else(|| block.transactions().skip(1).last().filter(|tx| !tx.is_coinbase()))?;
    stake_tx.vin.first()?.address.as_deref()
}

/// Extracts everything `block` contributes to the index.
///
/// Outputs paying exactly one tracked address become UTXOs. Inputs become spends
/// unless the node reports they spend an untracked address. A stake block yields a
/// reward only when its payout goes to a tracked identity and the staking source,
/// when known, is that same address; a payout to a different address is delegated
/// staking and never attributed. In [`ScanMode::Rewards`] only rewards are extracted.
#[must_use]
pub fn extract_block_effects(
    block: &Block,
    tracking: &Tracking,
    mode: ScanMode,
    classification: Option<Classification>,
) -> BlockEffects {
    let block_ref = block.block_ref();
    let mut effects = BlockEffects::empty(block_ref);

    if mode == ScanMode::Full {
        for tx in block.transactions() {
            collect_outputs(block, tx, tracking, &mut effects);
            collect_spends(block, tx, tracking, &mut effects);
        }
    }

    if let Some(classification) = classification.filter(|c| c.is_stake) {
        if let Some(reward) = attribute_reward(block, tracking, classification) {
            effects.rewards.push(reward);
        }
    }

    effects
}

fn collect_outputs(block: &Block, tx: &Transaction, tracking: &Tracking, effects: &mut BlockEffects) {
    for output in &tx.vout {
        if let Some(primary) = &output.script_pub_key.identityprimary {
            if tracking.tracks_identity(&primary.identityaddress) {
                effects.identities.push(IdentitySighting {
                    address: primary.identityaddress.clone(),
                    name: Some(primary.name.clone()),
                    height: block.height,
                });
            }
        }

        let Some(address) = output.sole_address() else { continue };
        if !tracking.tracks_address(address) {
            continue;
        }
        effects.created.push(Utxo {
            txid: tx.txid.clone(),
            vout: output.n,
            address: address.to_string(),
            value_sats: output.amount_sats(),
            height: block.height,
            block_hash: block.hash.clone(),
            spent: false,
            spent_txid: None,
            spent_height: None,
        });
    }
}

fn collect_spends(block: &Block, tx: &Transaction, tracking: &Tracking, effects: &mut BlockEffects) {
    if tx.is_coinbase() {
        return;
    }
    for input in &tx.vin {
        let Some((txid, vout)) = input.outpoint() else { continue };
        if let Some(address) = &input.address {
            if !tracking.tracks_address(address) {
                continue;
            }
        }
        effects.spends.push(Spend {
            txid: txid.to_string(),
            vout,
            spending_txid: tx.txid.clone(),
            height: block.height,
            block_hash: block.hash.clone(),
        });
    }
}

fn attribute_reward(
    block: &Block,
    tracking: &Tracking,
    classification: Classification,
) -> Option<StakingReward> {
    let (reward_tx, payout) = reward_payout(block)?;
    let address = payout.sole_address()?;
    if !tracking.tracks_identity(address) {
        return None;
    }

    if let Some(source) = staking_source(block) {
        if source != address {
            tracing::debug!(
                height = block.height,
                payout = address,
                source,
                "delegated stake, reward not attributed"
            );
            return None;
        }
    }

    Some(StakingReward {
        identity_address: address.to_string(),
        height: block.height,
        block_hash: block.hash.clone(),
        block_time: block.time,
        txid: reward_tx.txid.clone(),
        vout: payout.n,
        amount_sats: payout.amount_sats(),
        classifier: classification.classifier,
    })
}
