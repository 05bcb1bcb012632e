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

//! Consistency-guarded cache of the staking position of the selected (account, chain).
//!
//! The cache holds at most one position, belonging to the currently selected account and chain.
//! Its lifecycle is:
//!
//! - `Empty`: nothing has been computed for the selection yet;
//! - `Fetching`: a position fetch is running, or the last fetch has not produced a complete
//!   same-era position yet;
//! - `Ready`: a complete position is available. It has either been computed, or restored from
//!   the durable store.
//!
//! Selecting another account or chain clears everything and returns to `Empty`. Fetches that
//! have been started for the previous selection are discarded when they complete, and they
//! never block fetches of the new selection. A `Ready` position is only persisted once all its
//! fields have been read at the same era, and it is only restored if it has been computed for
//! the currently observed era. The observed era never moves backwards when a fetch returns
//! position of an older era.

use crate::{
	client::{SessionClient, StakingClient},
	position::{fetch_position, PositionDraft, StakingPositionSnapshot},
	rewards::{PendingRewards, RewardReconciler},
	AccountId, EngineConfig, EraIndex, Error, Loadable, Result, LOG_TARGET,
};

use parking_lot::Mutex;
use time::OffsetDateTime;

pub mod codec;
pub mod in_flight;
pub mod store;

pub use in_flight::{FetchKind, InFlight};
pub use store::{MemoryStore, PositionStore};

/// State of the position cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
	/// Nothing has been computed for the selection yet.
	Empty,
	/// Position is being fetched.
	Fetching,
	/// Complete position is available.
	Ready,
}

/// Result of the refresh request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// Cached data is already available, nothing has been fetched.
	Cached,
	/// The same fetch is already running, nothing has been fetched.
	AlreadyInFlight,
	/// Data has been fetched and it is complete.
	Ready,
	/// Data has been fetched, but it is still incomplete.
	Incomplete,
	/// Selection has changed during the fetch and the data has been thrown away.
	Discarded,
}

/// Selected account and chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Selection {
	account: AccountId,
	chain: String,
}

/// Identifies the selection that a fetch has been started for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SelectionTag {
	selection: Selection,
	generation: u64,
}

struct CacheData {
	selection: Option<Selection>,
	/// Incremented on every selection change.
	generation: u64,
	state: CacheState,
	observed_era: Option<EraIndex>,
	draft: PositionDraft,
	snapshot: Option<StakingPositionSnapshot>,
	pending_rewards: Loadable<PendingRewards>,
}

impl CacheData {
	fn tag(&self) -> Result<SelectionTag> {
		let selection = self.selection.clone().ok_or(Error::NoSelection)?;
		Ok(SelectionTag { selection, generation: self.generation })
	}

	fn is_selected(&self, tag: &SelectionTag) -> bool {
		self.generation == tag.generation && self.selection.as_ref() == Some(&tag.selection)
	}

	fn clear(&mut self) {
		self.state = CacheState::Empty;
		self.draft = PositionDraft::default();
		self.snapshot = None;
		self.pending_rewards = Loadable::Loading;
	}

	/// Switches to the observed era. Position of any other era is discarded.
	fn observe_era(&mut self, era: EraIndex) {
		if self.observed_era == Some(era) {
			return
		}

		self.observed_era = Some(era);
		if let Some(stored_era) = self.snapshot.as_ref().map(|snapshot| snapshot.current_era) {
			if stored_era != era {
				log::info!(
					target: LOG_TARGET,
					"{}. Discarding staking position",
					Error::StaleState { stored_era, current_era: era },
				);
				self.clear();
				return
			}
		}
		self.pending_rewards = Loadable::Loading;
	}

	/// Ends the fetch that has not produced a complete position.
	fn end_incomplete_fetch(&mut self) {
		self.state =
			if self.snapshot.is_some() { CacheState::Ready } else { CacheState::Fetching };
	}
}

/// Cache of the staking position of the selected account.
pub struct PositionCache<S> {
	store: S,
	config: EngineConfig,
	data: Mutex<CacheData>,
	in_flight: InFlight<SelectionTag>,
}

impl<S: PositionStore> PositionCache<S> {
	/// Creates empty cache on top of the durable store.
	pub fn new(store: S, config: EngineConfig) -> Self {
		PositionCache {
			store,
			config,
			data: Mutex::new(CacheData {
				selection: None,
				generation: 0,
				state: CacheState::Empty,
				observed_era: None,
				draft: PositionDraft::default(),
				snapshot: None,
				pending_rewards: Loadable::Loading,
			}),
			in_flight: InFlight::default(),
		}
	}

	/// Selects account and chain. Clears all cached data if the selection changes.
	pub fn select(&self, account: AccountId, chain: String) {
		let selection = Selection { account, chain };
		let mut data = self.data.lock();
		if data.selection.as_ref() == Some(&selection) {
			return
		}

		if let Some(ref previous) = data.selection {
			log::info!(
				target: LOG_TARGET,
				"Selection has changed from {}@{} to {}@{}. Clearing staking position",
				previous.account,
				previous.chain,
				selection.account,
				selection.chain,
			);
		}

		data.selection = Some(selection);
		data.generation += 1;
		data.observed_era = None;
		data.clear();
	}

	/// Returns selected account and chain.
	pub fn selection(&self) -> Option<(AccountId, String)> {
		self.data
			.lock()
			.selection
			.as_ref()
			.map(|selection| (selection.account.clone(), selection.chain.clone()))
	}

	/// Returns cache state.
	pub fn state(&self) -> CacheState {
		self.data.lock().state
	}

	/// Returns complete position of the selected account, if available.
	pub fn snapshot(&self) -> Option<StakingPositionSnapshot> {
		self.data.lock().snapshot.clone()
	}

	/// Returns partially loaded position of the selected account.
	pub fn draft(&self) -> PositionDraft {
		self.data.lock().draft.clone()
	}

	/// Returns unclaimed rewards of the selected account.
	pub fn pending_rewards(&self) -> Loadable<PendingRewards> {
		self.data.lock().pending_rewards.clone()
	}

	/// Reports the active era, observed by the caller.
	///
	/// Position that has been computed for another era is discarded, so that the next refresh
	/// recomputes it.
	pub fn observe_era(&self, era: EraIndex) {
		self.data.lock().observe_era(era);
	}

	/// Restores position of the selected account from the durable store.
	///
	/// The `current_era` is observed first, so cached position of another era is discarded.
	/// The stored position is only accepted if it has been computed for the `current_era`.
	/// Returns `true` if the position has been restored.
	pub async fn restore(&self, current_era: EraIndex) -> Result<bool> {
		let tag = {
			let mut data = self.data.lock();
			let tag = data.tag()?;
			data.observe_era(current_era);
			tag
		};

		let key = self.config.storage_key(&tag.selection.chain, &tag.selection.account);
		let stored = match self.store.get(&key).await? {
			Some(blob) => codec::decode(&blob)?,
			None => return Ok(false),
		};
		if stored.era != current_era {
			log::info!(
				target: LOG_TARGET,
				"{}. Ignoring stored staking position",
				Error::StaleState { stored_era: stored.era, current_era },
			);
			return Ok(false)
		}

		let mut data = self.data.lock();
		if !data.is_selected(&tag) || data.observed_era != Some(current_era) {
			return Ok(false)
		}
		if data.state == CacheState::Ready {
			return Ok(false)
		}

		log::info!(
			target: LOG_TARGET,
			"Restored staking position of {} at era {}",
			tag.selection.account,
			current_era,
		);
		data.snapshot = Some(stored.into_snapshot());
		data.state = CacheState::Ready;
		Ok(true)
	}

	/// Fetches position of the selected account.
	///
	/// Nothing is fetched if the position is `Ready` and `force` is `false`, or if the position
	/// of the current selection is being fetched already. Fails with [`Error::Timeout`] if the
	/// fetch has not completed in time. Position that has been read at an era older than the
	/// observed one is ignored.
	pub async fn refresh<St: StakingClient, Se: SessionClient>(
		&self,
		staking: &St,
		session: &Se,
		force: bool,
	) -> Result<RefreshOutcome> {
		let tag = {
			let data = self.data.lock();
			let tag = data.tag()?;
			if data.state == CacheState::Ready && !force {
				return Ok(RefreshOutcome::Cached)
			}
			tag
		};

		let account = &tag.selection.account;
		let _guard = match self.in_flight.try_acquire(&tag, FetchKind::Position) {
			Some(guard) => guard,
			None => return Ok(RefreshOutcome::AlreadyInFlight),
		};

		self.set_state(&tag, CacheState::Fetching);
		let fetch = fetch_position(staking, session, account);
		let draft = match async_std::future::timeout(self.config.fetch_timeout, fetch).await {
			Ok(draft) => draft,
			Err(_) => {
				log::warn!(
					target: LOG_TARGET,
					"Position fetch of {} has timed out",
					account,
				);
				let mut data = self.data.lock();
				if data.is_selected(&tag) && data.state == CacheState::Fetching {
					data.state = if data.snapshot.is_some() {
						CacheState::Ready
					} else {
						CacheState::Empty
					};
				}
				return Err(Error::Timeout(self.config.fetch_timeout))
			},
		};

		let snapshot = {
			let mut data = self.data.lock();
			if !data.is_selected(&tag) {
				log::info!(
					target: LOG_TARGET,
					"Discarding position of {}@{}: selection has changed",
					account,
					tag.selection.chain,
				);
				return Ok(RefreshOutcome::Discarded)
			}

			match (draft.era(), data.observed_era) {
				(Some(era), Some(observed_era)) if era < observed_era => {
					log::warn!(
						target: LOG_TARGET,
						"Position of {} has been read at era {}, but era {} is observed already. \
						Ignoring it",
						account,
						era,
						observed_era,
					);
					data.end_incomplete_fetch();
					return Ok(RefreshOutcome::Incomplete)
				},
				(Some(era), _) => data.observe_era(era),
				(None, _) => (),
			}

			data.draft.merge(draft);
			let snapshot =
				data.draft.complete(&tag.selection.chain, account, OffsetDateTime::now_utc());
			match snapshot {
				Some(snapshot) => {
					data.snapshot = Some(snapshot.clone());
					data.state = CacheState::Ready;
					snapshot
				},
				None => {
					log::debug!(
						target: LOG_TARGET,
						"Position of {} is incomplete: {:?}",
						account,
						data.draft,
					);
					data.end_incomplete_fetch();
					return Ok(RefreshOutcome::Incomplete)
				},
			}
		};

		self.persist(&snapshot).await;
		Ok(RefreshOutcome::Ready)
	}

	/// Finds unclaimed rewards of the selected account.
	///
	/// Nothing is fetched if the rewards of the selected account are being fetched already.
	pub async fn refresh_pending_rewards<C: StakingClient>(
		&self,
		client: &C,
		active_era: EraIndex,
	) -> Result<RefreshOutcome> {
		let tag = self.data.lock().tag()?;
		let account = &tag.selection.account;
		let _guard = match self.in_flight.try_acquire(&tag, FetchKind::PendingRewards) {
			Some(guard) => guard,
			None => return Ok(RefreshOutcome::AlreadyInFlight),
		};

		let reconciler = RewardReconciler::new(client.clone(), self.config.clone());
		let rewards = async_std::future::timeout(
			self.config.fetch_timeout,
			reconciler.find_unclaimed_rewards(account, active_era, &tag.selection.chain),
		)
		.await
		.map_err(|_| Error::Timeout(self.config.fetch_timeout))??;

		let mut data = self.data.lock();
		if !data.is_selected(&tag) || data.observed_era.map_or(false, |era| era != active_era) {
			return Ok(RefreshOutcome::Discarded)
		}

		log::info!(
			target: LOG_TARGET,
			"Found {} unclaimed rewards of {} ({} total)",
			rewards.len(),
			account,
			rewards.total(),
		);
		data.pending_rewards = Loadable::Present(rewards);
		Ok(RefreshOutcome::Ready)
	}

	/// Handles change of the durable store entry.
	///
	/// If another writer has persisted position of the selected account for the observed era,
	/// it replaces the cached one. Returns `true` if the position has been replaced.
	pub async fn on_store_changed(&self, key: &str) -> Result<bool> {
		let (tag, era) = {
			let data = self.data.lock();
			let tag = data.tag()?;
			match data.observed_era {
				Some(era) => (tag, era),
				None => return Ok(false),
			}
		};
		if key != self.config.storage_key(&tag.selection.chain, &tag.selection.account) {
			return Ok(false)
		}

		let stored = match self.store.get(key).await? {
			Some(blob) => codec::decode(&blob)?,
			None => return Ok(false),
		};

		let mut data = self.data.lock();
		if stored.era != era || !data.is_selected(&tag) || data.observed_era != Some(era) {
			return Ok(false)
		}

		let snapshot = stored.into_snapshot();
		if data.snapshot.as_ref() == Some(&snapshot) {
			return Ok(false)
		}

		log::info!(target: LOG_TARGET, "Reloaded staking position of {}", tag.selection.account);
		data.snapshot = Some(snapshot);
		data.state = CacheState::Ready;
		Ok(true)
	}

	/// Follows changes of the durable store until the store is dropped.
	pub async fn follow_store(&self) {
		use futures::StreamExt;

		let mut changes = self.store.subscribe();
		while let Some(key) = changes.next().await {
			if let Err(error) = self.on_store_changed(&key).await {
				log::warn!(target: LOG_TARGET, "Failed to reload {}: {}", key, error);
			}
		}
	}

	fn set_state(&self, tag: &SelectionTag, state: CacheState) {
		let mut data = self.data.lock();
		if data.is_selected(tag) {
			data.state = state;
		}
	}

	async fn persist(&self, snapshot: &StakingPositionSnapshot) {
		let key = self.config.storage_key(&snapshot.chain, &snapshot.account);
		let result = match codec::encode(snapshot) {
			Ok(blob) => self.store.set(&key, blob).await,
			Err(error) => Err(error),
		};

		match result {
			Ok(()) => log::info!(
				target: LOG_TARGET,
				"Persisted staking position of {} at era {}",
				snapshot.account,
				snapshot.current_era,
			),
			Err(error) => log::warn!(
				target: LOG_TARGET,
				"Failed to persist staking position of {}: {}",
				snapshot.account,
				error,
			),
		}
	}
}
