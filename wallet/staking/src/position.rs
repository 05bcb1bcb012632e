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

//! Staking position of a stash and the fetcher that assembles it from chain reads.

use crate::{
	client::{AccountBalances, RewardDestination, SessionClient, StakingClient, StakingLedger},
	era::{compute_era_timing, EraTimingInfo},
	unbonding::{compute_unstaking, UnbondingChunk, UnstakingSummary},
	AccountId, Balance, EraIndex, Result, LOG_TARGET,
};

use time::OffsetDateTime;

/// Value that is loaded asynchronously.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Loadable<T> {
	/// Value has not been loaded yet.
	#[default]
	Loading,
	/// Value has been loaded and it is confirmed to be absent.
	Absent,
	/// Value has been loaded.
	Present(T),
}

impl<T> Loadable<T> {
	/// Returns `true` if the value has been loaded (or is confirmed to be absent).
	pub fn is_resolved(&self) -> bool {
		!matches!(self, Loadable::Loading)
	}

	/// Returns reference to the value, if it is present.
	pub fn present(&self) -> Option<&T> {
		match self {
			Loadable::Present(value) => Some(value),
			Loadable::Loading | Loadable::Absent => None,
		}
	}

	/// Returns `None` if the value is still loading, and loaded value otherwise.
	pub fn resolved(&self) -> Option<Option<&T>> {
		match self {
			Loadable::Loading => None,
			Loadable::Absent => Some(None),
			Loadable::Present(value) => Some(Some(value)),
		}
	}

	/// Replaces the value with the `newer` one, unless the `newer` is still loading.
	pub fn merge(&mut self, newer: Loadable<T>) {
		if newer.is_resolved() {
			*self = newer;
		}
	}
}

impl<T> From<Option<T>> for Loadable<T> {
	fn from(value: Option<T>) -> Self {
		value.map_or(Loadable::Absent, Loadable::Present)
	}
}

/// Nomination status of a stash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NominationStatus {
	/// The stash is not nominating.
	Idle,
	/// None of nominated validators is active in the current session.
	Waiting,
	/// At least one nominated validator is active in the current session.
	Active,
}

/// Complete staking position of a stash at some era.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingPositionSnapshot {
	/// Chain that the position has been read from.
	pub chain: String,
	/// Stash account.
	pub account: AccountId,
	/// Active era at the moment of the read.
	pub current_era: EraIndex,
	/// Free balance that is not bonded yet.
	pub available_to_stake: Balance,
	/// Bonded balance that is at stake.
	pub staked: Balance,
	/// Account that receives rewards, or `None` if rewards are not paid.
	pub reward_destination: Option<AccountId>,
	/// Unbonding schedule.
	pub unstaking: UnstakingSummary,
	/// Rewards that have been earned during the stash lifetime.
	pub total_rewards_earned: Balance,
	/// Nomination status.
	pub nomination_status: NominationStatus,
}

/// Partially loaded staking position.
///
/// Every field is loaded independently. Fields that have failed to load stay
/// [`Loadable::Loading`] until the next fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionDraft {
	/// Active era, read before all other fields.
	pub era_before: Option<EraIndex>,
	/// Active era, read after all other fields.
	pub era_after: Option<EraIndex>,
	/// Account balances.
	pub balances: Loadable<AccountBalances>,
	/// Staking ledger, absent if the stash is not bonded.
	pub ledger: Loadable<StakingLedger>,
	/// Era timing.
	pub timing: Loadable<EraTimingInfo>,
	/// Lifetime rewards, absent if not tracked by the chain client.
	pub total_rewards_earned: Loadable<Balance>,
	/// Reward destination, absent if the stash is not bonded.
	pub reward_destination: Loadable<RewardDestination>,
	/// Nomination status.
	pub nomination_status: Loadable<NominationStatus>,
}

impl PositionDraft {
	/// Returns era of the draft, if both era reads agree.
	pub fn era(&self) -> Option<EraIndex> {
		match (self.era_before, self.era_after) {
			(Some(before), Some(after)) if before == after => Some(before),
			_ => None,
		}
	}

	/// Merges `newer` draft into this one.
	///
	/// Fields of drafts that have been read at different eras are never mixed: unless both
	/// drafts have been read at the same era, this draft is replaced with the `newer` one.
	pub fn merge(&mut self, newer: PositionDraft) {
		if self.era().is_none() || self.era() != newer.era() {
			*self = newer;
			return
		}

		self.era_before = newer.era_before;
		self.balances.merge(newer.balances);
		self.ledger.merge(newer.ledger);
		self.timing.merge(newer.timing);
		self.total_rewards_earned.merge(newer.total_rewards_earned);
		self.reward_destination.merge(newer.reward_destination);
		self.nomination_status.merge(newer.nomination_status);
	}

	/// Builds the position snapshot.
	///
	/// Returns `None` if some field is still loading, or if the fields have been read at
	/// different eras.
	pub fn complete(
		&self,
		chain: &str,
		account: &AccountId,
		now: OffsetDateTime,
	) -> Option<StakingPositionSnapshot> {
		let timing = self.timing.present()?;
		if self.era() != Some(timing.active_era) {
			return None
		}

		let balances = self.balances.present()?;
		let ledger = self.ledger.resolved()?;
		let total_rewards_earned = self.total_rewards_earned.resolved()?;
		let reward_destination = self.reward_destination.resolved()?;
		let nomination_status = *self.nomination_status.present()?;

		let chunks: Vec<_> = ledger
			.map(|ledger| {
				ledger
					.unlocking
					.iter()
					.map(|chunk| UnbondingChunk::from_ledger(chunk, timing.active_era))
					.collect()
			})
			.unwrap_or_default();

		Some(StakingPositionSnapshot {
			chain: chain.into(),
			account: account.clone(),
			current_era: timing.active_era,
			available_to_stake: balances
				.free
				.saturating_sub(ledger.map_or(0, |ledger| ledger.total)),
			staked: ledger.map_or(0, |ledger| ledger.active),
			reward_destination: reward_destination
				.and_then(|destination| destination.resolve(account)),
			unstaking: compute_unstaking(&chunks, timing, now),
			total_rewards_earned: total_rewards_earned.copied().unwrap_or(0),
			nomination_status,
		})
	}
}

/// Reads staking position of the stash.
///
/// All reads are issued concurrently, between two reads of the active era. Failed reads are
/// logged and leave their fields loading.
pub async fn fetch_position<St: StakingClient, Se: SessionClient>(
	staking: &St,
	session: &Se,
	stash: &AccountId,
) -> PositionDraft {
	let era_before = read_active_era(staking).await;
	let (balances, ledger, timing, total_rewards_earned, reward_destination, status) =
		futures::join!(
			staking.balances(stash, None),
			staking.ledger(stash, None),
			compute_era_timing(staking, session),
			staking.total_rewards_earned(stash),
			staking.payee(stash, None),
			nomination_status(staking, session, stash),
		);
	let era_after = read_active_era(staking).await;

	PositionDraft {
		era_before,
		era_after,
		balances: loaded("balances", balances.map(Some)),
		ledger: loaded("ledger", ledger),
		timing: loaded("era timing", timing.map(Some)),
		total_rewards_earned: loaded("total rewards", total_rewards_earned),
		reward_destination: loaded("reward destination", reward_destination),
		nomination_status: loaded("nomination status", status.map(Some)),
	}
}

/// Returns nomination status of the stash.
pub async fn nomination_status<St: StakingClient, Se: SessionClient>(
	staking: &St,
	session: &Se,
	stash: &AccountId,
) -> Result<NominationStatus> {
	let targets = match staking.nominations(stash, None).await? {
		Some(targets) if !targets.is_empty() => targets,
		_ => return Ok(NominationStatus::Idle),
	};

	let validators = session.session_validators(None).await?;
	Ok(if targets.iter().any(|target| validators.contains(target)) {
		NominationStatus::Active
	} else {
		NominationStatus::Waiting
	})
}

async fn read_active_era<St: StakingClient>(staking: &St) -> Option<EraIndex> {
	match staking.active_era(None).await {
		Ok(active_era) => active_era.map(|active_era| active_era.index),
		Err(error) => {
			log::warn!(target: LOG_TARGET, "Failed to read active era: {}", error);
			None
		},
	}
}

fn loaded<T>(what: &str, result: Result<Option<T>>) -> Loadable<T> {
	match result {
		Ok(value) => value.into(),
		Err(error) => {
			log::warn!(target: LOG_TARGET, "Failed to read {}: {}", what, error);
			Loadable::Loading
		},
	}
}
