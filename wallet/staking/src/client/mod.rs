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

//! Chain client seams used by the staking engine.
//!
//! The engine never talks to a node directly. Instead it reads decoded storage items through
//! the [`SessionClient`] and [`StakingClient`] traits. When staking lives at the same chain
//! as session management, a single client implements both. Otherwise the session client
//! reads the relay chain and the staking client reads the chain that hosts the staking pallet.

use crate::{
	AccountId, Balance, BlockHash, BlockNumber, EraIndex, Page, Result, RewardPoint, SessionIndex,
};

use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod caching;

pub use caching::CachingClient;

/// Denominator of the validator commission, as stored in [`ValidatorPrefs`].
pub const COMMISSION_DENOMINATOR: u32 = 10_000_000;

/// Information regarding the active era.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveEraInfo {
	/// Index of era.
	pub index: EraIndex,
	/// Moment of start expressed as millisecond from `$UNIX_EPOCH`.
	///
	/// Start is `None` until the first block of the era is finalized.
	pub start: Option<u64>,
}

/// Balance that is scheduled to be unlocked at given era.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlockChunk {
	/// Amount of funds to be unlocked.
	pub value: Balance,
	/// Era number at which point it'll be unlocked.
	pub era: EraIndex,
}

/// The ledger of a (bonded) stash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingLedger {
	/// The stash account whose balance is actually locked and at stake.
	pub stash: AccountId,
	/// `active` plus all the `unlocking` balances.
	pub total: Balance,
	/// The amount of the stash's balance that will be at stake in any forthcoming rounds.
	pub active: Balance,
	/// Balance that is becoming free, in the order of unlock eras.
	pub unlocking: Vec<UnlockChunk>,
}

/// A destination account for payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewardDestination {
	/// Pay into the stash account, increasing the amount at stake accordingly.
	Staked,
	/// Pay into the stash account, not increasing the amount at stake.
	Stash,
	/// Pay into the controller account, which is the stash itself nowadays.
	Controller,
	/// Pay into a specified account.
	Account(AccountId),
	/// Receive no reward.
	None,
}

impl RewardDestination {
	/// Returns account that receives rewards of the given stash.
	pub fn resolve(&self, stash: &AccountId) -> Option<AccountId> {
		match self {
			RewardDestination::Staked | RewardDestination::Stash | RewardDestination::Controller =>
				Some(stash.clone()),
			RewardDestination::Account(account) => Some(account.clone()),
			RewardDestination::None => None,
		}
	}
}

/// Balances of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountBalances {
	/// Free balance, including the bonded part.
	pub free: Balance,
	/// Reserved balance.
	pub reserved: Balance,
	/// Balance that can't be transferred.
	pub frozen: Balance,
}

/// The amount of exposure (to slashing) than an individual nominator has.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndividualExposure {
	/// The stash account of the nominator in question.
	pub who: AccountId,
	/// Amount of funds exposed.
	pub value: Balance,
}

/// Metadata of the paged exposure of a validator at some era.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PagedExposureMetadata {
	/// The total balance backing this validator.
	pub total: Balance,
	/// The validator's own stash that is exposed.
	pub own: Balance,
	/// Number of nominators backing this validator.
	pub nominator_count: u32,
	/// Number of pages of nominators.
	pub page_count: Page,
}

/// A page of nominators backing a validator at some era.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExposurePage {
	/// The total balance of this chunk/page.
	pub page_total: Balance,
	/// The portions of nominators stashes that are exposed.
	pub others: Vec<IndividualExposure>,
}

/// Legacy (non-paged) snapshot of a validator exposure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Exposure {
	/// The total balance backing this validator.
	pub total: Balance,
	/// The validator's own stash that is exposed.
	pub own: Balance,
	/// The portions of nominators stashes that are exposed.
	pub others: Vec<IndividualExposure>,
}

/// Reward points of an era. Used to split era total payout between validators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EraRewardPoints {
	/// Total number of points. Equals the sum of reward points for each validator.
	pub total: RewardPoint,
	/// The reward points earned by a given validator.
	pub individual: BTreeMap<AccountId, RewardPoint>,
}

/// Preferences of a validator at some era.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorPrefs {
	/// Reward that validator takes up-front, in parts per [`COMMISSION_DENOMINATOR`].
	pub commission: u32,
	/// Whether or not this validator is accepting more nominations.
	pub blocked: bool,
}

/// Client that reads session and block production state.
///
/// When staking lives at a parachain, this client is connected to the relay chain.
#[async_trait]
pub trait SessionClient: Clone + Send + Sync + 'static {
	/// Returns number of the best block.
	async fn current_block_number(&self) -> Result<BlockNumber>;
	/// Returns index of the current session.
	async fn current_session_index(&self, at: Option<BlockHash>) -> Result<SessionIndex>;
	/// Returns session length in blocks (`Babe::EpochDuration` constant).
	async fn session_length(&self) -> Result<BlockNumber>;
	/// Returns expected block time in milliseconds (`Babe::ExpectedBlockTime` constant).
	async fn expected_block_time(&self) -> Result<Option<u64>>;
	/// Returns minimum period between blocks in milliseconds (`Timestamp::MinimumPeriod`).
	async fn minimum_period(&self) -> Result<Option<u64>>;
	/// Returns validators of the current session.
	async fn session_validators(&self, at: Option<BlockHash>) -> Result<Vec<AccountId>>;
}

/// Client that reads staking pallet state.
///
/// Records of ended eras are read at some finalized block of the staking chain, so that a
/// single scan never mixes states of different blocks.
#[async_trait]
pub trait StakingClient: Clone + Send + Sync + 'static {
	/// Returns hash of the best finalized block.
	async fn best_finalized_block(&self) -> Result<BlockHash>;
	/// Returns the active era, or `None` if no era has started yet.
	async fn active_era(&self, at: Option<BlockHash>) -> Result<Option<ActiveEraInfo>>;
	/// Returns `(era, start_session)` pairs of all bonded eras.
	async fn bonded_eras(&self, at: Option<BlockHash>) -> Result<Vec<(EraIndex, SessionIndex)>>;
	/// Returns the `SessionsPerEra` constant.
	async fn sessions_per_era(&self) -> Result<SessionIndex>;
	/// Returns the `BondingDuration` constant.
	async fn bonding_duration(&self) -> Result<EraIndex>;
	/// Returns the `HistoryDepth` constant.
	async fn history_depth(&self) -> Result<EraIndex>;

	/// Returns balances of the given account.
	async fn balances(&self, account: &AccountId, at: Option<BlockHash>)
		-> Result<AccountBalances>;
	/// Returns ledger of the given stash.
	async fn ledger(&self, stash: &AccountId, at: Option<BlockHash>)
		-> Result<Option<StakingLedger>>;
	/// Returns reward destination of the given stash.
	async fn payee(
		&self,
		stash: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Option<RewardDestination>>;
	/// Returns targets nominated by the given stash.
	async fn nominations(
		&self,
		stash: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Option<Vec<AccountId>>>;
	/// Returns lifetime rewards of the given stash, if the backend tracks them.
	async fn total_rewards_earned(&self, stash: &AccountId) -> Result<Option<Balance>>;

	/// Returns `true` if the chain stores exposures in the paged format.
	async fn has_paged_exposures(&self) -> Result<bool>;
	/// Returns exposure metadata of all validators, active at given era.
	async fn eras_stakers_overview(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, PagedExposureMetadata)>>;
	/// Returns given page of the validator exposure at given era.
	async fn eras_stakers_paged(
		&self,
		era: EraIndex,
		validator: &AccountId,
		page: Page,
		at: Option<BlockHash>,
	) -> Result<Option<ExposurePage>>;
	/// Returns legacy exposures of all validators, active at given era.
	async fn eras_stakers(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, Exposure)>>;
	/// Returns exposure pages of the validator for which rewards have already been claimed.
	async fn claimed_rewards(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Vec<Page>>;
	/// Returns total payout of all validators at given era, if the era has ended.
	async fn eras_validator_reward(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Option<Balance>>;
	/// Returns reward points of given era.
	async fn eras_reward_points(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<EraRewardPoints>;
	/// Returns preferences of the validator at given era.
	async fn eras_validator_prefs(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<ValidatorPrefs>;

	/// Returns deposit required to register for fast unstake, or `None` if fast unstake is
	/// not supported by the chain.
	async fn fast_unstake_deposit(&self) -> Result<Option<Balance>>;
	/// Returns `true` if the stash is already in the fast unstake queue.
	async fn fast_unstake_queued(&self, stash: &AccountId, at: Option<BlockHash>)
		-> Result<bool>;
}
