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

//! Staking client implementation that is caching (whenever possible) results of its backend
//! method calls.
//!
//! Exposures, reward points, payouts and validator preferences of an era never change once
//! the era has ended (that is when its total payout is known). Everything else is read from
//! the backend on every call.

use crate::{
	client::{
		AccountBalances, ActiveEraInfo, EraRewardPoints, Exposure, ExposurePage,
		PagedExposureMetadata, RewardDestination, StakingClient, StakingLedger, ValidatorPrefs,
	},
	AccountId, Balance, BlockHash, EraIndex, Page, Result, SessionIndex, LOG_TARGET,
};

use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use quick_cache::unsync::Cache;

/// `quick_cache::unsync::Cache` wrapped in async-aware synchronization primitives.
type SyncCache<K, V> = Arc<RwLock<Cache<K, V>>>;

/// Capacity of era-keyed caches. Reward reconciliation never touches more than a few eras.
const ERA_CACHE_CAPACITY: usize = 128;
/// Capacity of (era, validator)-keyed caches.
const VALIDATOR_CACHE_CAPACITY: usize = 16_384;

/// Staking client that is caching reads of ended eras.
#[derive(Clone)]
pub struct CachingClient<B: StakingClient> {
	backend: B,
	data: Arc<ClientData>,
}

/// Client data, shared by all `CachingClient` clones.
struct ClientData {
	validator_reward_cache: SyncCache<EraIndex, Balance>,
	reward_points_cache: SyncCache<EraIndex, EraRewardPoints>,
	overview_cache: SyncCache<EraIndex, Vec<(AccountId, PagedExposureMetadata)>>,
	legacy_exposure_cache: SyncCache<EraIndex, Vec<(AccountId, Exposure)>>,
	exposure_page_cache: SyncCache<(EraIndex, AccountId, Page), Option<ExposurePage>>,
	validator_prefs_cache: SyncCache<(EraIndex, AccountId), ValidatorPrefs>,
}

impl<B: StakingClient> CachingClient<B> {
	/// Creates new `CachingClient` on top of given `backend`.
	pub fn new(backend: B) -> Self {
		CachingClient {
			backend,
			data: Arc::new(ClientData {
				validator_reward_cache: Arc::new(RwLock::new(Cache::new(ERA_CACHE_CAPACITY))),
				reward_points_cache: Arc::new(RwLock::new(Cache::new(ERA_CACHE_CAPACITY))),
				overview_cache: Arc::new(RwLock::new(Cache::new(ERA_CACHE_CAPACITY))),
				legacy_exposure_cache: Arc::new(RwLock::new(Cache::new(ERA_CACHE_CAPACITY))),
				exposure_page_cache: Arc::new(RwLock::new(Cache::new(VALIDATOR_CACHE_CAPACITY))),
				validator_prefs_cache: Arc::new(RwLock::new(Cache::new(
					VALIDATOR_CACHE_CAPACITY,
				))),
			}),
		}
	}

	/// Returns reference to the backend client.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Try to get value from the cache, or compute and insert it using given future.
	async fn get_or_insert_async<K: Clone + std::fmt::Debug + Eq + std::hash::Hash, V: Clone>(
		&self,
		cache: &SyncCache<K, V>,
		key: &K,
		with: impl std::future::Future<Output = Result<V>>,
	) -> Result<V> {
		// try to get cached value first using read lock
		{
			let cache = cache.read().await;
			if let Some(value) = cache.get(key) {
				log::trace!(target: LOG_TARGET, "Cache hit: {:?}", key);
				return Ok(value.clone())
			}
		}

		// compute the value without holding any locks - it may cause additional misses and
		// double insertions, but that's better than holding a lock for a while
		let value = with.await?;

		cache.write().await.insert(key.clone(), value.clone());
		Ok(value)
	}

	/// Returns `true` if the era has ended and its records are immutable.
	async fn is_era_ended(&self, era: EraIndex, at: Option<BlockHash>) -> Result<bool> {
		self.eras_validator_reward(era, at).await.map(|reward| reward.is_some())
	}
}

impl<B: StakingClient + std::fmt::Debug> std::fmt::Debug for CachingClient<B> {
	fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
		fmt.write_fmt(format_args!("CachingClient<{:?}>", self.backend))
	}
}

#[async_trait]
impl<B: StakingClient> StakingClient for CachingClient<B> {
	async fn best_finalized_block(&self) -> Result<BlockHash> {
		self.backend.best_finalized_block().await
	}

	async fn active_era(&self, at: Option<BlockHash>) -> Result<Option<ActiveEraInfo>> {
		self.backend.active_era(at).await
	}

	async fn bonded_eras(&self, at: Option<BlockHash>) -> Result<Vec<(EraIndex, SessionIndex)>> {
		self.backend.bonded_eras(at).await
	}

	async fn sessions_per_era(&self) -> Result<SessionIndex> {
		self.backend.sessions_per_era().await
	}

	async fn bonding_duration(&self) -> Result<EraIndex> {
		self.backend.bonding_duration().await
	}

	async fn history_depth(&self) -> Result<EraIndex> {
		self.backend.history_depth().await
	}

	async fn balances(
		&self,
		account: &AccountId,
		at: Option<BlockHash>,
	) -> Result<AccountBalances> {
		self.backend.balances(account, at).await
	}

	async fn ledger(
		&self,
		stash: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Option<StakingLedger>> {
		self.backend.ledger(stash, at).await
	}

	async fn payee(
		&self,
		stash: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Option<RewardDestination>> {
		self.backend.payee(stash, at).await
	}

	async fn nominations(
		&self,
		stash: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Option<Vec<AccountId>>> {
		self.backend.nominations(stash, at).await
	}

	async fn total_rewards_earned(&self, stash: &AccountId) -> Result<Option<Balance>> {
		self.backend.total_rewards_earned(stash).await
	}

	async fn has_paged_exposures(&self) -> Result<bool> {
		self.backend.has_paged_exposures().await
	}

	async fn eras_stakers_overview(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, PagedExposureMetadata)>> {
		if !self.is_era_ended(era, at).await? {
			return self.backend.eras_stakers_overview(era, at).await
		}

		self.get_or_insert_async(
			&self.data.overview_cache,
			&era,
			self.backend.eras_stakers_overview(era, at),
		)
		.await
	}

	async fn eras_stakers_paged(
		&self,
		era: EraIndex,
		validator: &AccountId,
		page: Page,
		at: Option<BlockHash>,
	) -> Result<Option<ExposurePage>> {
		if !self.is_era_ended(era, at).await? {
			return self.backend.eras_stakers_paged(era, validator, page, at).await
		}

		self.get_or_insert_async(
			&self.data.exposure_page_cache,
			&(era, validator.clone(), page),
			self.backend.eras_stakers_paged(era, validator, page, at),
		)
		.await
	}

	async fn eras_stakers(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, Exposure)>> {
		if !self.is_era_ended(era, at).await? {
			return self.backend.eras_stakers(era, at).await
		}

		self.get_or_insert_async(
			&self.data.legacy_exposure_cache,
			&era,
			self.backend.eras_stakers(era, at),
		)
		.await
	}

	async fn claimed_rewards(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Vec<Page>> {
		// claims may happen at any moment
		self.backend.claimed_rewards(era, validator, at).await
	}

	async fn eras_validator_reward(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Option<Balance>> {
		{
			let cache = self.data.validator_reward_cache.read().await;
			if let Some(reward) = cache.get(&era) {
				return Ok(Some(*reward))
			}
		}

		// the reward is only set when the era ends, so `None` is never cached
		let reward = self.backend.eras_validator_reward(era, at).await?;
		if let Some(reward) = reward {
			self.data.validator_reward_cache.write().await.insert(era, reward);
		}
		Ok(reward)
	}

	async fn eras_reward_points(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<EraRewardPoints> {
		if !self.is_era_ended(era, at).await? {
			return self.backend.eras_reward_points(era, at).await
		}

		self.get_or_insert_async(
			&self.data.reward_points_cache,
			&era,
			self.backend.eras_reward_points(era, at),
		)
		.await
	}

	async fn eras_validator_prefs(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<ValidatorPrefs> {
		if !self.is_era_ended(era, at).await? {
			return self.backend.eras_validator_prefs(era, validator, at).await
		}

		self.get_or_insert_async(
			&self.data.validator_prefs_cache,
			&(era, validator.clone()),
			self.backend.eras_validator_prefs(era, validator, at),
		)
		.await
	}

	async fn fast_unstake_deposit(&self) -> Result<Option<Balance>> {
		self.backend.fast_unstake_deposit().await
	}

	async fn fast_unstake_queued(&self, stash: &AccountId, at: Option<BlockHash>) -> Result<bool> {
		self.backend.fast_unstake_queued(stash, at).await
	}
}
