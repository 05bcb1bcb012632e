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

//! Staking engine configuration.

use crate::{EraIndex, Result};

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// Default number of past eras scanned for unclaimed rewards.
pub const MAX_SUPPORTED_PAYOUT_ERAS: u32 = 7;
/// Default timeout of a single fetch cycle.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Default number of eras that are scanned concurrently.
pub const DEFAULT_ERA_FETCH_CONCURRENCY: usize = 4;
/// Default namespace of persisted snapshots.
pub const DEFAULT_STORAGE_KEY_PREFIX: &str = "staking_position";

/// First eras with paged exposures on known chains.
///
/// Rewards of earlier eras are stored in the legacy (non-paged) format, which is not supported
/// by the reward reconciliation. Chains that are missing here have no supported eras.
pub const PAGED_REWARDS_START_ERA: [(&str, EraIndex); 3] =
	[("polkadot", 1420), ("kusama", 6514), ("westend", 7167)];

/// Staking engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
	/// Number of eras before the active era that are scanned for unclaimed rewards.
	pub max_supported_payout_eras: u32,
	/// First paged-exposure era, keyed by chain name.
	pub paged_rewards_start_era: BTreeMap<String, EraIndex>,
	/// Maximal duration of a single fetch cycle.
	#[serde(with = "duration_secs")]
	pub fetch_timeout: Duration,
	/// Number of eras that are scanned concurrently by the exposure scan.
	pub era_fetch_concurrency: usize,
	/// Prefix of the durable storage keys.
	pub storage_key_prefix: String,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			max_supported_payout_eras: MAX_SUPPORTED_PAYOUT_ERAS,
			paged_rewards_start_era: PAGED_REWARDS_START_ERA
				.iter()
				.map(|(chain, era)| (chain.to_string(), *era))
				.collect(),
			fetch_timeout: DEFAULT_FETCH_TIMEOUT,
			era_fetch_concurrency: DEFAULT_ERA_FETCH_CONCURRENCY,
			storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.into(),
		}
	}
}

impl EngineConfig {
	/// Parse configuration from JSON. Missing fields are filled with defaults.
	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	/// Returns first paged-exposure era of the given chain.
	pub fn paged_rewards_start_era(&self, chain_name: &str) -> Option<EraIndex> {
		self.paged_rewards_start_era.get(&chain_name.to_lowercase()).copied()
	}

	/// Durable storage key of the snapshot of given account at given chain.
	pub fn storage_key(&self, chain: &str, account: &str) -> String {
		format!("{}/{}/{}", self.storage_key_prefix, chain, account)
	}
}

mod duration_secs {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_secs)
	}
}
