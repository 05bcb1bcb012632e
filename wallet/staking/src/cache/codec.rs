// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Serialization types for durable persistence of position snapshots.
//!
//! Balances are stored as decimal strings, so that they survive JSON parsers that only support
//! 53-bit integers. Dates are stored as unix timestamps.

use crate::{
	position::{NominationStatus, StakingPositionSnapshot},
	unbonding::{ReleaseEntry, UnstakingSummary},
	AccountId, Balance, EraIndex, Result,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Version of the stored format.
pub const STORED_POSITION_VERSION: u32 = 1;

/// Stored snapshot, tagged with the era it has been computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPosition {
	/// Format version.
	pub version: u32,
	/// Era the snapshot has been computed for.
	pub era: EraIndex,
	/// Snapshot itself.
	pub snapshot: StoredSnapshot,
}

/// Stored `StakingPositionSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
	chain: String,
	account: AccountId,
	#[serde(with = "balance")]
	available_to_stake: Balance,
	#[serde(with = "balance")]
	staked: Balance,
	reward_destination: Option<AccountId>,
	#[serde(with = "balance")]
	total_unlocking: Balance,
	#[serde(with = "balance")]
	total_redeemable: Balance,
	schedule: Vec<StoredReleaseEntry>,
	#[serde(with = "balance")]
	total_rewards_earned: Balance,
	nomination_status: StoredNominationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredReleaseEntry {
	#[serde(with = "balance")]
	amount: Balance,
	#[serde(with = "time::serde::timestamp")]
	release_date: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum StoredNominationStatus {
	Idle,
	Waiting,
	Active,
}

impl StoredPosition {
	/// Convert from snapshot to storable format.
	pub fn from_snapshot(snapshot: &StakingPositionSnapshot) -> Self {
		StoredPosition {
			version: STORED_POSITION_VERSION,
			era: snapshot.current_era,
			snapshot: StoredSnapshot {
				chain: snapshot.chain.clone(),
				account: snapshot.account.clone(),
				available_to_stake: snapshot.available_to_stake,
				staked: snapshot.staked,
				reward_destination: snapshot.reward_destination.clone(),
				total_unlocking: snapshot.unstaking.total_unlocking,
				total_redeemable: snapshot.unstaking.total_redeemable,
				schedule: snapshot
					.unstaking
					.schedule
					.iter()
					.map(|entry| StoredReleaseEntry {
						amount: entry.amount,
						release_date: entry.release_date,
					})
					.collect(),
				total_rewards_earned: snapshot.total_rewards_earned,
				nomination_status: match snapshot.nomination_status {
					NominationStatus::Idle => StoredNominationStatus::Idle,
					NominationStatus::Waiting => StoredNominationStatus::Waiting,
					NominationStatus::Active => StoredNominationStatus::Active,
				},
			},
		}
	}

	/// Convert to snapshot.
	pub fn into_snapshot(self) -> StakingPositionSnapshot {
		let stored = self.snapshot;
		StakingPositionSnapshot {
			chain: stored.chain,
			account: stored.account,
			current_era: self.era,
			available_to_stake: stored.available_to_stake,
			staked: stored.staked,
			reward_destination: stored.reward_destination,
			unstaking: UnstakingSummary {
				total_unlocking: stored.total_unlocking,
				total_redeemable: stored.total_redeemable,
				schedule: stored
					.schedule
					.into_iter()
					.map(|entry| ReleaseEntry {
						amount: entry.amount,
						release_date: entry.release_date,
					})
					.collect(),
			},
			total_rewards_earned: stored.total_rewards_earned,
			nomination_status: match stored.nomination_status {
				StoredNominationStatus::Idle => NominationStatus::Idle,
				StoredNominationStatus::Waiting => NominationStatus::Waiting,
				StoredNominationStatus::Active => NominationStatus::Active,
			},
		}
	}
}

/// Encodes snapshot into JSON blob.
pub fn encode(snapshot: &StakingPositionSnapshot) -> Result<String> {
	Ok(serde_json::to_string(&StoredPosition::from_snapshot(snapshot))?)
}

/// Decodes JSON blob.
pub fn decode(blob: &str) -> Result<StoredPosition> {
	Ok(serde_json::from_str(blob)?)
}

/// Serde codec of balances as decimal strings.
mod balance {
	use crate::Balance;
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(balance: &Balance, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&balance.to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Balance, D::Error> {
		let value = String::deserialize(deserializer)?;
		value
			.parse()
			.map_err(|_| D::Error::custom(format!("invalid balance: {:?}", value)))
	}
}
