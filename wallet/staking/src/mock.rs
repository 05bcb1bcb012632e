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

//! In-memory chain used by tests.

use crate::{
	client::{
		AccountBalances, ActiveEraInfo, EraRewardPoints, Exposure, ExposurePage,
		IndividualExposure, PagedExposureMetadata, RewardDestination, SessionClient,
		StakingClient, StakingLedger, UnlockChunk, ValidatorPrefs,
	},
	era::EraTimingInfo,
	AccountId, Balance, BlockHash, BlockNumber, EngineConfig, EraIndex, Error, Page, Result,
	SessionIndex,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::Arc,
	time::Duration,
};

/// Stash that is used in most tests.
pub const ALICE: &str = "alice";
/// Chain name, known to the `test_config()`.
pub const TEST_CHAIN: &str = "testnet";

/// Configuration with paged rewards starting at era 5 of the `TEST_CHAIN`.
pub fn test_config() -> EngineConfig {
	EngineConfig {
		paged_rewards_start_era: [(TEST_CHAIN.to_string(), 5)].into(),
		fetch_timeout: Duration::from_millis(200),
		..Default::default()
	}
}

/// Timing of the era 10 with six sessions per era.
pub fn timing(era_length: u64, era_progress: u64, block_time: u64) -> EraTimingInfo {
	EraTimingInfo {
		active_era: 10,
		era_length,
		era_progress,
		session_length: era_length / 6,
		session_progress: 0,
		block_time,
		active_era_duration: era_length * block_time * 1000,
	}
}

/// Chain state, served by the `TestClient`.
#[derive(Debug)]
pub struct TestClientData {
	pub block_number: BlockNumber,
	pub current_session_index: SessionIndex,
	pub session_length: BlockNumber,
	pub expected_block_time: Option<u64>,
	pub minimum_period: Option<u64>,
	pub session_validators: Vec<AccountId>,

	pub active_era: Option<ActiveEraInfo>,
	/// Active era indices that are switched to on every next `active_era` read.
	pub scripted_active_eras: VecDeque<EraIndex>,
	pub bonded_eras: Vec<(EraIndex, SessionIndex)>,
	pub sessions_per_era: SessionIndex,
	pub bonding_duration: EraIndex,
	pub history_depth: EraIndex,

	pub balances: HashMap<AccountId, AccountBalances>,
	pub ledgers: HashMap<AccountId, StakingLedger>,
	pub payees: HashMap<AccountId, RewardDestination>,
	pub nominations: HashMap<AccountId, Vec<AccountId>>,
	pub reward_totals: HashMap<AccountId, Balance>,

	pub paged_exposures: bool,
	pub overviews: HashMap<EraIndex, Vec<(AccountId, PagedExposureMetadata)>>,
	pub exposure_pages: HashMap<(EraIndex, AccountId, Page), ExposurePage>,
	pub legacy_exposures: HashMap<EraIndex, Vec<(AccountId, Exposure)>>,
	pub claimed_rewards: HashMap<(EraIndex, AccountId), Vec<Page>>,
	pub validator_rewards: HashMap<EraIndex, Balance>,
	pub reward_points: HashMap<EraIndex, EraRewardPoints>,
	pub validator_prefs: HashMap<(EraIndex, AccountId), ValidatorPrefs>,

	pub fast_unstake_deposit: Option<Balance>,
	pub fast_unstake_queue: HashSet<AccountId>,

	pub finalized_block: BlockHash,
	/// Reads of historical state that have not been made at the `finalized_block`.
	pub unpinned_reads: Vec<String>,
	/// Delay of every query.
	pub delay: Option<Duration>,
	failures: HashSet<String>,
	hanging: HashSet<String>,
	queries: Vec<String>,
}

impl TestClientData {
	/// Chain at era 10 with a single bonded stash (`ALICE`), nominating `V1` and `V3`.
	pub fn minimal() -> Self {
		TestClientData {
			block_number: 36_000,
			current_session_index: 60,
			session_length: 600,
			expected_block_time: Some(6000),
			minimum_period: Some(3000),
			session_validators: vec!["V1".into(), "V2".into()],

			active_era: Some(ActiveEraInfo { index: 10, start: Some(1_700_000_000_000) }),
			scripted_active_eras: VecDeque::new(),
			bonded_eras: vec![(9, 54), (10, 60)],
			sessions_per_era: 6,
			bonding_duration: 28,
			history_depth: 84,

			balances: [(
				ALICE.to_string(),
				AccountBalances { free: 2_000, reserved: 0, frozen: 1_500 },
			)]
			.into(),
			ledgers: [(
				ALICE.to_string(),
				StakingLedger {
					stash: ALICE.into(),
					total: 1_500,
					active: 1_000,
					unlocking: vec![
						UnlockChunk { value: 200, era: 9 },
						UnlockChunk { value: 300, era: 12 },
					],
				},
			)]
			.into(),
			payees: [(ALICE.to_string(), RewardDestination::Staked)].into(),
			nominations: [(ALICE.to_string(), vec!["V1".to_string(), "V3".to_string()])].into(),
			reward_totals: [(ALICE.to_string(), 1_234)].into(),

			paged_exposures: true,
			overviews: HashMap::new(),
			exposure_pages: HashMap::new(),
			legacy_exposures: HashMap::new(),
			claimed_rewards: HashMap::new(),
			validator_rewards: HashMap::new(),
			reward_points: HashMap::new(),
			validator_prefs: HashMap::new(),

			fast_unstake_deposit: Some(100),
			fast_unstake_queue: HashSet::new(),

			finalized_block: BlockHash([1; 32]),
			unpinned_reads: Vec::new(),
			delay: None,
			failures: HashSet::new(),
			hanging: HashSet::new(),
			queries: Vec::new(),
		}
	}

	/// Chain where `ALICE` has been exposed during eras 4, 7, 8 and 9.
	///
	/// Unclaimed rewards of `ALICE` are 45 at era 9 (`V1`) and 50 at era 7 (`V3`). Era 9 `V2`
	/// reward is zero, era 8 `V1` page has been claimed and era 4 predates paged exposures.
	pub fn with_rewards_scenario() -> Self {
		let mut data = Self::minimal();

		data.expose_paged(9, "V1", 90, vec![vec![(ALICE, 10)]]);
		data.expose_paged(9, "V2", 0, vec![vec![(ALICE, 5)]]).total = 0;
		data.expose_paged(8, "V1", 70, vec![vec![("bob", 10)], vec![(ALICE, 20)]]);
		data.expose_paged(7, "V3", 180, vec![vec![(ALICE, 20)]]);
		data.expose_paged(4, "V1", 90, vec![vec![(ALICE, 10)]]);

		data.validator_rewards = [(4, 1_000), (7, 2_000), (8, 1_000), (9, 1_000)].into();
		data.reward_points = [
			(9, points(&[("V1", 50), ("V2", 50)])),
			(8, points(&[("V1", 50), ("V2", 50)])),
			(7, points(&[("V3", 10), ("V1", 30)])),
			(4, points(&[("V1", 1)])),
		]
		.into();
		data.validator_prefs = [
			((9, "V1".to_string()), ValidatorPrefs { commission: 1_000_000, blocked: false }),
			((8, "V1".to_string()), ValidatorPrefs { commission: 1_000_000, blocked: false }),
			((7, "V3".to_string()), ValidatorPrefs { commission: 0, blocked: true }),
		]
		.into();
		data.claimed_rewards = [((8, "V1".to_string()), vec![1])].into();

		data
	}

	/// Number of issued queries of given kind.
	pub fn queries_of(&self, kind: &str) -> usize {
		self.queries.iter().filter(|query| query.split(':').next() == Some(kind)).count()
	}

	/// Adds paged exposure of the validator at given era. Returns exposure metadata.
	pub fn expose_paged(
		&mut self,
		era: EraIndex,
		validator: &str,
		own: Balance,
		pages: Vec<Vec<(&str, Balance)>>,
	) -> &mut PagedExposureMetadata {
		let mut metadata = PagedExposureMetadata {
			total: own,
			own,
			nominator_count: 0,
			page_count: pages.len() as Page,
		};
		for (index, page) in pages.into_iter().enumerate() {
			let others: Vec<_> = page
				.into_iter()
				.map(|(who, value)| IndividualExposure { who: who.into(), value })
				.collect();
			let page_total = others.iter().map(|nominator| nominator.value).sum();
			metadata.total += page_total;
			metadata.nominator_count += others.len() as u32;
			self.exposure_pages.insert(
				(era, validator.into(), index as Page),
				ExposurePage { page_total, others },
			);
		}

		let overview = self.overviews.entry(era).or_default();
		overview.push((validator.into(), metadata));
		&mut overview.last_mut().expect("just pushed; qed").1
	}
}

fn points(individual: &[(&str, u32)]) -> EraRewardPoints {
	EraRewardPoints {
		total: individual.iter().map(|(_, points)| points).sum(),
		individual: individual.iter().map(|(who, points)| (who.to_string(), *points)).collect(),
	}
}

/// Client that serves `TestClientData`.
#[derive(Clone, Debug)]
pub struct TestClient {
	pub data: Arc<Mutex<TestClientData>>,
}

impl From<TestClientData> for TestClient {
	fn from(data: TestClientData) -> Self {
		TestClient { data: Arc::new(Mutex::new(data)) }
	}
}

impl TestClient {
	/// Number of queries that have been issued.
	pub fn queries(&self) -> usize {
		self.data.lock().queries.len()
	}

	/// Returns `true` if the query has been issued.
	pub fn queried(&self, key: &str) -> bool {
		self.data.lock().queries.iter().any(|query| query == key)
	}

	/// Fail queries with given key. Key without `:` fails all queries of that kind.
	pub fn fail(&self, key: &str) {
		self.data.lock().failures.insert(key.into());
	}

	/// Stop failing queries with given key.
	pub fn recover(&self, key: &str) {
		self.data.lock().failures.remove(key);
	}

	/// Never respond to queries with given key.
	pub fn hang(&self, key: &str) {
		self.data.lock().hanging.insert(key.into());
	}

	/// Respond to queries with given key again.
	pub fn recover_hanging(&self, key: &str) {
		self.data.lock().hanging.remove(key);
	}

	async fn query(&self, key: String) -> Result<()> {
		let kind = key.split(':').next().unwrap_or_default().to_string();
		let (delay, fails, hangs) = {
			let mut data = self.data.lock();
			data.queries.push(key.clone());
			let matches = |keys: &HashSet<String>| keys.contains(&key) || keys.contains(&kind);
			(data.delay, matches(&data.failures), matches(&data.hanging))
		};

		if let Some(delay) = delay {
			async_std::task::sleep(delay).await;
		}
		if hangs {
			futures::future::pending::<()>().await;
		}
		if fails {
			return Err(Error::Client(format!("{} has failed", key)))
		}
		Ok(())
	}

	async fn query_at(&self, key: String, at: Option<BlockHash>) -> Result<()> {
		{
			let mut data = self.data.lock();
			if at != Some(data.finalized_block) {
				data.unpinned_reads.push(key.clone());
			}
		}
		self.query(key).await
	}
}

#[async_trait]
impl SessionClient for TestClient {
	async fn current_block_number(&self) -> Result<BlockNumber> {
		self.query("block_number".into()).await?;
		Ok(self.data.lock().block_number)
	}

	async fn current_session_index(&self, _at: Option<BlockHash>) -> Result<SessionIndex> {
		self.query("session_index".into()).await?;
		Ok(self.data.lock().current_session_index)
	}

	async fn session_length(&self) -> Result<BlockNumber> {
		self.query("session_length".into()).await?;
		Ok(self.data.lock().session_length)
	}

	async fn expected_block_time(&self) -> Result<Option<u64>> {
		self.query("expected_block_time".into()).await?;
		Ok(self.data.lock().expected_block_time)
	}

	async fn minimum_period(&self) -> Result<Option<u64>> {
		self.query("minimum_period".into()).await?;
		Ok(self.data.lock().minimum_period)
	}

	async fn session_validators(&self, _at: Option<BlockHash>) -> Result<Vec<AccountId>> {
		self.query("session_validators".into()).await?;
		Ok(self.data.lock().session_validators.clone())
	}
}

#[async_trait]
impl StakingClient for TestClient {
	async fn best_finalized_block(&self) -> Result<BlockHash> {
		self.query("best_finalized_block".into()).await?;
		Ok(self.data.lock().finalized_block)
	}

	async fn active_era(&self, _at: Option<BlockHash>) -> Result<Option<ActiveEraInfo>> {
		self.query("active_era".into()).await?;
		let mut data = self.data.lock();
		if let Some(next_era) = data.scripted_active_eras.pop_front() {
			if let Some(ref mut active_era) = data.active_era {
				active_era.index = next_era;
			}
		}
		Ok(data.active_era.clone())
	}

	async fn bonded_eras(&self, _at: Option<BlockHash>) -> Result<Vec<(EraIndex, SessionIndex)>> {
		self.query("bonded_eras".into()).await?;
		Ok(self.data.lock().bonded_eras.clone())
	}

	async fn sessions_per_era(&self) -> Result<SessionIndex> {
		self.query("sessions_per_era".into()).await?;
		Ok(self.data.lock().sessions_per_era)
	}

	async fn bonding_duration(&self) -> Result<EraIndex> {
		self.query("bonding_duration".into()).await?;
		Ok(self.data.lock().bonding_duration)
	}

	async fn history_depth(&self) -> Result<EraIndex> {
		self.query("history_depth".into()).await?;
		Ok(self.data.lock().history_depth)
	}

	async fn balances(
		&self,
		account: &AccountId,
		_at: Option<BlockHash>,
	) -> Result<AccountBalances> {
		self.query(format!("balances:{}", account)).await?;
		Ok(self.data.lock().balances.get(account).cloned().unwrap_or_default())
	}

	async fn ledger(
		&self,
		stash: &AccountId,
		_at: Option<BlockHash>,
	) -> Result<Option<StakingLedger>> {
		self.query(format!("ledger:{}", stash)).await?;
		Ok(self.data.lock().ledgers.get(stash).cloned())
	}

	async fn payee(
		&self,
		stash: &AccountId,
		_at: Option<BlockHash>,
	) -> Result<Option<RewardDestination>> {
		self.query(format!("payee:{}", stash)).await?;
		Ok(self.data.lock().payees.get(stash).cloned())
	}

	async fn nominations(
		&self,
		stash: &AccountId,
		_at: Option<BlockHash>,
	) -> Result<Option<Vec<AccountId>>> {
		self.query(format!("nominations:{}", stash)).await?;
		Ok(self.data.lock().nominations.get(stash).cloned())
	}

	async fn total_rewards_earned(&self, stash: &AccountId) -> Result<Option<Balance>> {
		self.query(format!("rewards_earned:{}", stash)).await?;
		Ok(self.data.lock().reward_totals.get(stash).copied())
	}

	async fn has_paged_exposures(&self) -> Result<bool> {
		self.query("paged_exposures".into()).await?;
		Ok(self.data.lock().paged_exposures)
	}

	async fn eras_stakers_overview(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, PagedExposureMetadata)>> {
		self.query_at(format!("overview:{}", era), at).await?;
		Ok(self.data.lock().overviews.get(&era).cloned().unwrap_or_default())
	}

	async fn eras_stakers_paged(
		&self,
		era: EraIndex,
		validator: &AccountId,
		page: Page,
		at: Option<BlockHash>,
	) -> Result<Option<ExposurePage>> {
		self.query_at(format!("paged:{}:{}:{}", era, validator, page), at).await?;
		Ok(self.data.lock().exposure_pages.get(&(era, validator.clone(), page)).cloned())
	}

	async fn eras_stakers(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<(AccountId, Exposure)>> {
		self.query_at(format!("eras_stakers:{}", era), at).await?;
		Ok(self.data.lock().legacy_exposures.get(&era).cloned().unwrap_or_default())
	}

	async fn claimed_rewards(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<Vec<Page>> {
		self.query_at(format!("claimed:{}:{}", era, validator), at).await?;
		Ok(self
			.data
			.lock()
			.claimed_rewards
			.get(&(era, validator.clone()))
			.cloned()
			.unwrap_or_default())
	}

	async fn eras_validator_reward(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Option<Balance>> {
		self.query_at(format!("reward:{}", era), at).await?;
		Ok(self.data.lock().validator_rewards.get(&era).copied())
	}

	async fn eras_reward_points(
		&self,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<EraRewardPoints> {
		self.query_at(format!("points:{}", era), at).await?;
		Ok(self.data.lock().reward_points.get(&era).cloned().unwrap_or_default())
	}

	async fn eras_validator_prefs(
		&self,
		era: EraIndex,
		validator: &AccountId,
		at: Option<BlockHash>,
	) -> Result<ValidatorPrefs> {
		self.query_at(format!("prefs:{}:{}", era, validator), at).await?;
		Ok(self
			.data
			.lock()
			.validator_prefs
			.get(&(era, validator.clone()))
			.cloned()
			.unwrap_or_default())
	}

	async fn fast_unstake_deposit(&self) -> Result<Option<Balance>> {
		self.query("fast_unstake_deposit".into()).await?;
		Ok(self.data.lock().fast_unstake_deposit)
	}

	async fn fast_unstake_queued(&self, stash: &AccountId, at: Option<BlockHash>) -> Result<bool> {
		self.query_at(format!("fast_unstake_queued:{}", stash), at).await?;
		Ok(self.data.lock().fast_unstake_queue.contains(stash))
	}
}
