//! Account records and the leaf sets derived from them.
//!
//! The network tree carries one leaf per eligible account holding the total
//! power delegated *to* that account. A delegate tree for account `t` carries
//! one leaf per account holding its own power when it delegates to `t`, and
//! zero otherwise. Both sets are index-aligned with the snapshot.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TreeError;
use crate::node::VotingTreeNode;

/// A 20-byte account address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    /// Builds an id whose last eight bytes hold `value`; handy for fixtures.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(trimmed).map_err(|err| format!("invalid account id: {err}"))?;
        if bytes.len() != 20 {
            return Err(format!("account id must be 20 bytes, got {}", bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Voting data of one eligible account at a snapshot height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The account itself.
    pub account: AccountId,
    /// Power the account holds in its own right.
    pub voting_power: U256,
    /// Account receiving this account's power; the account itself when self-delegating.
    pub delegate: AccountId,
}

/// One leaf per record carrying the power delegated to that record's account.
///
/// Delegates that are not themselves in `records` are ignored.
pub fn network_leaves(records: &[AccountRecord]) -> Result<Vec<VotingTreeNode>, TreeError> {
    let mut delegated: HashMap<AccountId, U256> = HashMap::with_capacity(records.len());
    for record in records {
        let bucket = delegated.entry(record.delegate).or_default();
        *bucket = bucket
            .checked_add(record.voting_power)
            .ok_or(TreeError::SumOverflow)?;
    }

    Ok(records
        .iter()
        .map(|record| match delegated.get(&record.account) {
            Some(power) if !power.is_zero() => VotingTreeNode::leaf(*power),
            _ => VotingTreeNode::zero(),
        })
        .collect())
}

/// One leaf per record carrying its power when it delegates to `target`, zero otherwise.
pub fn delegate_leaves(records: &[AccountRecord], target: &AccountId) -> Vec<VotingTreeNode> {
    records
        .iter()
        .map(|record| {
            if &record.delegate == target {
                VotingTreeNode::leaf(record.voting_power)
            } else {
                VotingTreeNode::zero()
            }
        })
        .collect()
}
