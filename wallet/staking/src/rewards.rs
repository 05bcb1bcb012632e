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

//! Reconciliation of unclaimed staking rewards.
//!
//! Rewards of a nominator are paid per (era, validator, exposure page). The reconciler walks
//! back through the last [`EngineConfig::max_supported_payout_eras`] eras, finds exposures of
//! the stash, drops pages that have already been claimed and computes the stash share of the
//! remaining validator payouts.
//!
//! The share is computed the same way the staking pallet pays it out:
//!
//! ```text
//! available = era_payout * validator_points / total_points
//! net       = available - commission * available
//! share     = net * my_stake / validator_total
//! ```
//!
//! Commission is always applied before the pro-rata split, and every division rounds down.
//! Failure of a single era or validator is logged and the item is dropped: rewards are
//! additive, so the missing item is recovered on the next scan.
//!
//! Every scan reads chain state at a single finalized block.

use crate::{
	client::{ExposurePage, PagedExposureMetadata, StakingClient, COMMISSION_DENOMINATOR},
	era::EraTimingInfo,
	AccountId, Balance, BlockHash, EngineConfig, EraIndex, Error, Page, Result, RewardPoint,
	LOG_TARGET,
};

use futures::channel::mpsc::UnboundedSender;
use sp_arithmetic::{helpers_128bit::multiply_by_rational_with_rounding, Rounding};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Exposure of the stash behind a validator at some era.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposureRecord {
	/// Era of the exposure.
	pub era: EraIndex,
	/// Validator that is backed by the stash.
	pub validator_address: AccountId,
	/// Stake of the stash, backing the validator.
	pub my_staked: Balance,
	/// Total stake backing the validator.
	pub validator_total: Balance,
	/// Exposure page that contains the stash.
	pub exposed_page: Page,
}

/// Unclaimed reward of the stash for a single (era, validator) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReward {
	/// Era of the reward.
	pub era: EraIndex,
	/// Validator that needs to be paid out.
	pub validator_address: AccountId,
	/// Exposure page that needs to be paid out.
	pub page: Page,
	/// Stash share of the payout.
	pub amount: Balance,
}

/// Unclaimed rewards, grouped by era and validator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingRewards(BTreeMap<EraIndex, BTreeMap<AccountId, (Page, Balance)>>);

impl PendingRewards {
	/// Inserts the reward, replacing any previous reward of the same (era, validator).
	pub fn insert(&mut self, reward: PendingReward) {
		self.0
			.entry(reward.era)
			.or_default()
			.insert(reward.validator_address, (reward.page, reward.amount));
	}

	/// Returns `(page, amount)` of the given (era, validator) reward.
	pub fn get(&self, era: EraIndex, validator: &str) -> Option<(Page, Balance)> {
		self.0.get(&era).and_then(|validators| validators.get(validator)).copied()
	}

	/// Returns rewards, grouped by era and validator.
	pub fn by_era(&self) -> &BTreeMap<EraIndex, BTreeMap<AccountId, (Page, Balance)>> {
		&self.0
	}

	/// Iterates over rewards, oldest era first.
	pub fn iter(&self) -> impl Iterator<Item = PendingReward> + '_ {
		self.0.iter().flat_map(|(era, validators)| {
			validators.iter().map(move |(validator, (page, amount))| PendingReward {
				era: *era,
				validator_address: validator.clone(),
				page: *page,
				amount: *amount,
			})
		})
	}

	/// Sum of all rewards.
	pub fn total(&self) -> Balance {
		self.iter().fold(0, |total, reward| total.saturating_add(reward.amount))
	}

	/// Number of (era, validator) pairs.
	pub fn len(&self) -> usize {
		self.0.values().map(|validators| validators.len()).sum()
	}

	/// Returns `true` if there are no unclaimed rewards.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Progress of the reward scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanProgress {
	/// Era exposures are being scanned.
	Era {
		/// Era that is being scanned.
		era: EraIndex,
		/// Number of eras that have been scanned already.
		scanned: usize,
		/// Total number of eras to scan.
		total: usize,
	},
	/// Exposures have been scanned, payouts are being computed.
	ComputingPayouts,
}

/// Finds unclaimed rewards of a stash.
pub struct RewardReconciler<C> {
	client: C,
	config: EngineConfig,
	progress: Option<UnboundedSender<ScanProgress>>,
}

impl<C: StakingClient> RewardReconciler<C> {
	/// Creates reconciler on top of the given client.
	pub fn new(client: C, config: EngineConfig) -> Self {
		RewardReconciler { client, config, progress: None }
	}

	/// Report scan progress to the given channel.
	pub fn with_progress(mut self, progress: UnboundedSender<ScanProgress>) -> Self {
		self.progress = Some(progress);
		self
	}

	/// Finds unclaimed rewards of the stash in eras preceding `active_era`.
	///
	/// Only eras with paged exposures are scanned. Fails with [`Error::Unavailable`] if the
	/// first paged era of the chain is unknown.
	pub async fn find_unclaimed_rewards(
		&self,
		stash: &AccountId,
		active_era: EraIndex,
		chain_name: &str,
	) -> Result<PendingRewards> {
		let first_paged_era = self.config.paged_rewards_start_era(chain_name).ok_or_else(|| {
			Error::Unavailable(format!("first paged rewards era of {} is unknown", chain_name))
		})?;
		let eras: Vec<EraIndex> = (1..=self.config.max_supported_payout_eras)
			.filter_map(|i| active_era.checked_sub(i))
			.filter(|era| *era >= first_paged_era)
			.collect();

		let at = Some(self.client.best_finalized_block().await?);
		log::trace!(target: LOG_TARGET, "Scanning rewards of {} at block {:?}", stash, at);

		let mut exposures = Vec::new();
		for (scanned, era) in eras.iter().enumerate() {
			self.report(ScanProgress::Era { era: *era, scanned, total: eras.len() });
			match self.exposures_at(stash, *era, at).await {
				Ok(era_exposures) => exposures.extend(era_exposures),
				Err(error) => log::warn!(
					target: LOG_TARGET,
					"Failed to read exposures of era {}: {}. Skipping era",
					era,
					error,
				),
			}
		}

		self.report(ScanProgress::ComputingPayouts);
		let unclaimed = self.drop_claimed(exposures, at).await;

		let mut by_era: BTreeMap<EraIndex, Vec<ExposureRecord>> = BTreeMap::new();
		for record in unclaimed {
			by_era.entry(record.era).or_default().push(record);
		}

		let era_rewards = futures::future::join_all(
			by_era.into_iter().map(|(era, records)| self.era_rewards(era, records, at)),
		)
		.await;

		let mut rewards = PendingRewards::default();
		for reward in era_rewards.into_iter().flatten() {
			rewards.insert(reward);
		}

		log::debug!(
			target: LOG_TARGET,
			"Found {} unclaimed rewards of {} in {} eras before {}",
			rewards.len(),
			stash,
			eras.len(),
			active_era,
		);

		Ok(rewards)
	}

	/// Returns the moment when rewards of the given era expire. See [`era_expiry_date`].
	pub async fn expiry_date(
		&self,
		era: EraIndex,
		timing: &EraTimingInfo,
		now: OffsetDateTime,
	) -> Result<Option<OffsetDateTime>> {
		let history_depth = self.client.history_depth().await?;
		Ok(era_expiry_date(era, history_depth, timing, now))
	}

	fn report(&self, progress: ScanProgress) {
		if let Some(ref sender) = self.progress {
			let _ = sender.unbounded_send(progress);
		}
	}

	/// Returns exposures of the stash at given era.
	async fn exposures_at(
		&self,
		stash: &AccountId,
		era: EraIndex,
		at: Option<BlockHash>,
	) -> Result<Vec<ExposureRecord>> {
		let overview = self.client.eras_stakers_overview(era, at).await?;
		let scans = overview
			.iter()
			.map(|(validator, metadata)| self.exposure_behind(stash, era, validator, metadata, at));

		Ok(futures::future::join_all(scans)
			.await
			.into_iter()
			.zip(overview.iter())
			.filter_map(|(result, (validator, _))| match result {
				Ok(record) => record,
				Err(error) => {
					log::warn!(target: LOG_TARGET, "{}", error.partial(era, validator.clone()));
					None
				},
			})
			.collect())
	}

	/// Returns exposure of the stash behind the validator, if any.
	async fn exposure_behind(
		&self,
		stash: &AccountId,
		era: EraIndex,
		validator: &AccountId,
		metadata: &PagedExposureMetadata,
		at: Option<BlockHash>,
	) -> Result<Option<ExposureRecord>> {
		let pages = futures::future::try_join_all(
			(0..metadata.page_count)
				.map(|page| self.client.eras_stakers_paged(era, validator, page, at)),
		)
		.await?;

		Ok(pages.into_iter().zip(0..).find_map(|(page, index): (Option<ExposurePage>, Page)| {
			page?.others.into_iter().find(|nominator| nominator.who == *stash).map(|nominator| {
				ExposureRecord {
					era,
					validator_address: validator.clone(),
					my_staked: nominator.value,
					validator_total: metadata.total,
					exposed_page: index,
				}
			})
		}))
	}

	/// Drops exposures that have been paid out already.
	async fn drop_claimed(
		&self,
		exposures: Vec<ExposureRecord>,
		at: Option<BlockHash>,
	) -> Vec<ExposureRecord> {
		let claimed = futures::future::join_all(exposures.iter().map(|record| {
			self.client.claimed_rewards(record.era, &record.validator_address, at)
		}))
		.await;

		exposures
			.into_iter()
			.zip(claimed)
			.filter_map(|(record, claimed)| match claimed {
				Ok(claimed) if claimed.contains(&record.exposed_page) => None,
				Ok(_) => Some(record),
				Err(error) => {
					log::warn!(
						target: LOG_TARGET,
						"{}",
						error.partial(record.era, record.validator_address.clone()),
					);
					None
				},
			})
			.collect()
	}

	/// Computes rewards of unclaimed exposures at given era.
	async fn era_rewards(
		&self,
		era: EraIndex,
		records: Vec<ExposureRecord>,
		at: Option<BlockHash>,
	) -> Vec<PendingReward> {
		let era_data = futures::try_join!(
			self.client.eras_validator_reward(era, at),
			self.client.eras_reward_points(era, at),
		);
		let (era_payout, points) = match era_data {
			Ok((Some(era_payout), points)) => (era_payout, points),
			Ok((None, _)) => {
				log::warn!(target: LOG_TARGET, "Era {} has no payout yet. Skipping era", era);
				return Vec::new()
			},
			Err(error) => {
				log::warn!(
					target: LOG_TARGET,
					"Failed to read payout of era {}: {}. Skipping era",
					era,
					error,
				);
				return Vec::new()
			},
		};

		let prefs = futures::future::join_all(
			records
				.iter()
				.map(|record| self.client.eras_validator_prefs(era, &record.validator_address, at)),
		)
		.await;

		records
			.into_iter()
			.zip(prefs)
			.filter_map(|(record, prefs)| {
				let prefs = match prefs {
					Ok(prefs) => prefs,
					Err(error) => {
						log::warn!(
							target: LOG_TARGET,
							"{}",
							error.partial(era, record.validator_address.clone()),
						);
						return None
					},
				};

				let validator_points =
					points.individual.get(&record.validator_address).copied().unwrap_or(0);
				let amount = unclaimed_share(
					era_payout,
					validator_points,
					points.total,
					prefs.commission,
					record.my_staked,
					record.validator_total,
				);
				log::trace!(
					target: LOG_TARGET,
					"Era {} validator {} page {}: unclaimed {}",
					era,
					record.validator_address,
					record.exposed_page,
					amount,
				);

				(amount != 0).then(|| PendingReward {
					era,
					validator_address: record.validator_address,
					page: record.exposed_page,
					amount,
				})
			})
			.collect()
	}
}

/// Converts commission in parts per [`COMMISSION_DENOMINATOR`] to whole percents.
///
/// Commissions below one percent are zero.
pub fn commission_percent(commission: u32) -> u32 {
	(commission / (COMMISSION_DENOMINATOR / 100)).min(100)
}

/// Computes stash share of the validator payout at some era.
///
/// Returns zero when the validator has no points or no stake.
pub fn unclaimed_share(
	era_payout: Balance,
	validator_points: RewardPoint,
	total_points: RewardPoint,
	commission: u32,
	my_staked: Balance,
	validator_total: Balance,
) -> Balance {
	let available =
		multiply_by_rational(era_payout, validator_points.into(), total_points.into());
	let commission_cut =
		multiply_by_rational(available, commission_percent(commission).into(), 100);
	let net_available = available.saturating_sub(commission_cut);

	multiply_by_rational(net_available, my_staked, validator_total)
}

/// `a * b / c`, rounding down. Zero if `c` is zero.
fn multiply_by_rational(a: Balance, b: Balance, c: Balance) -> Balance {
	multiply_by_rational_with_rounding(a, b, c, Rounding::Down).unwrap_or(0)
}

/// Returns the moment when rewards of the given era can no longer be claimed, or `None` if
/// they have expired already.
///
/// Rewards of era `e` are claimable while the active era is at most `e + history_depth`.
pub fn era_expiry_date(
	era: EraIndex,
	history_depth: EraIndex,
	timing: &EraTimingInfo,
	now: OffsetDateTime,
) -> Option<OffsetDateTime> {
	let last_claimable_era = era.saturating_add(history_depth);
	let remaining_eras = last_claimable_era.checked_sub(timing.active_era)?;

	Some(timing.date_after_eras(remaining_eras.saturating_add(1), now))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::{test_config, timing, TestClient, TestClientData, ALICE, TEST_CHAIN};
	use futures::StreamExt;

	fn reconciler(client: &TestClient) -> RewardReconciler<TestClient> {
		RewardReconciler::new(client.clone(), test_config())
	}

	fn expected_rewards() -> PendingRewards {
		let mut rewards = PendingRewards::default();
		rewards.insert(PendingReward {
			era: 9,
			validator_address: "V1".into(),
			page: 0,
			amount: 45,
		});
		rewards.insert(PendingReward {
			era: 7,
			validator_address: "V3".into(),
			page: 0,
			amount: 50,
		});
		rewards
	}

	#[test]
	fn share_is_net_of_commission_and_pro_rata() {
		// commission of 10%, half of the era points, 10% of the validator stake
		assert_eq!(unclaimed_share(1000, 50, 100, 1_000_000, 10, 100), 45);
	}

	#[test]
	fn share_of_validator_without_stake_is_zero() {
		assert_eq!(unclaimed_share(1000, 50, 100, 1_000_000, 10, 0), 0);
	}

	#[test]
	fn share_without_era_points_is_zero() {
		assert_eq!(unclaimed_share(1000, 0, 0, 0, 10, 100), 0);
	}

	#[test]
	fn share_rounds_down() {
		// available = 333, net = 333, share = 333 / 3 = 111
		assert_eq!(unclaimed_share(1000, 1, 3, 0, 1, 3), 111);
		// available = 1000, cut = 55% of it, share = 450 * 1 / 7 = 64.28
		assert_eq!(unclaimed_share(1000, 1, 1, 5_500_000, 1, 7), 64);
	}

	#[test]
	fn commission_is_normalized_to_percents() {
		assert_eq!(commission_percent(1_000_000), 10);
		assert_eq!(commission_percent(99_999), 0);
		assert_eq!(commission_percent(150_000), 1);
		assert_eq!(commission_percent(COMMISSION_DENOMINATOR), 100);
		assert_eq!(commission_percent(u32::MAX), 100);
	}

	#[test]
	fn huge_balances_do_not_overflow() {
		let payout = u128::MAX / 2;
		assert_eq!(unclaimed_share(payout, 1, 1, 0, 1, 1), payout);
	}

	#[async_std::test]
	async fn unclaimed_rewards_are_found() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		assert_eq!(rewards, expected_rewards());
		assert_eq!(rewards.total(), 95);
		assert_eq!(rewards.get(9, "V1"), Some((0, 45)));
	}

	#[async_std::test]
	async fn claimed_page_produces_no_reward() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		// alice is exposed on the page 1 of V1 at era 8, which has been claimed
		assert_eq!(rewards.get(8, "V1"), None);

		// once the page is unclaimed, the reward appears
		client.data.lock().claimed_rewards.insert((8, "V1".into()), vec![0]);
		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();
		assert_eq!(rewards.get(8, "V1"), Some((1, 90)));
	}

	#[async_std::test]
	async fn zero_rewards_are_omitted() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		// V2 has zero total stake at era 9
		assert_eq!(rewards.get(9, "V2"), None);
	}

	#[async_std::test]
	async fn reconciliation_is_idempotent() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		let reconciler = reconciler(&client);

		let first = reconciler.find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();
		let second = reconciler.find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		assert_eq!(first, second);
	}

	#[async_std::test]
	async fn eras_before_paged_rewards_are_skipped() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		// alice is exposed at era 4, but it is stored in the legacy format
		assert!(rewards.by_era().keys().all(|era| *era >= 5));
		assert!(!client.queried("overview:4"));
	}

	#[async_std::test]
	async fn lookback_window_is_bounded() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		let mut config = test_config();
		config.max_supported_payout_eras = 2;

		let rewards = RewardReconciler::new(client.clone(), config)
			.find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN)
			.await
			.unwrap();

		assert_eq!(rewards.by_era().keys().copied().collect::<Vec<_>>(), vec![9]);
		assert!(!client.queried("overview:7"));
	}

	#[async_std::test]
	async fn unknown_chain_is_unavailable() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		assert!(matches!(
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, "unknown").await,
			Err(Error::Unavailable(_)),
		));
	}

	#[async_std::test]
	async fn failed_items_are_dropped() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		client.fail("paged:9:V1:0");

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();
		assert_eq!(rewards.get(9, "V1"), None);
		assert_eq!(rewards.get(7, "V3"), Some((0, 50)));

		client.fail("overview:7");
		client.fail("prefs:9:V1");
		client.recover("paged:9:V1:0");
		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();
		assert!(rewards.is_empty());
	}

	#[async_std::test]
	async fn era_without_payout_is_skipped() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		client.data.lock().validator_rewards.remove(&9);

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();
		assert_eq!(rewards.iter().map(|reward| reward.era).collect::<Vec<_>>(), vec![7]);
	}

	#[async_std::test]
	async fn progress_is_reported_newest_era_first() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		let (sender, receiver) = futures::channel::mpsc::unbounded();

		reconciler(&client)
			.with_progress(sender)
			.find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN)
			.await
			.unwrap();

		let progress: Vec<_> = receiver.collect().await;
		let eras: Vec<_> = progress
			.iter()
			.filter_map(|progress| match progress {
				ScanProgress::Era { era, .. } => Some(*era),
				ScanProgress::ComputingPayouts => None,
			})
			.collect();
		assert_eq!(eras, vec![9, 8, 7, 6, 5]);
		assert_eq!(progress.last(), Some(&ScanProgress::ComputingPayouts));
	}

	#[test]
	fn expiry_date_is_derived_from_history_depth() {
		let timing = timing(2400, 600, 6);
		let now = OffsetDateTime::UNIX_EPOCH;

		// era 9 is claimable until era 10 + 83 ends
		assert_eq!(
			era_expiry_date(9, 84, &timing, now),
			Some(now + time::Duration::seconds((83 * 2400 + 1800) * 6)),
		);
		// era 0 is claimable until the active era ends
		assert_eq!(
			era_expiry_date(0, 10, &timing, now),
			Some(now + time::Duration::seconds(1800 * 6)),
		);
		assert_eq!(era_expiry_date(0, 9, &timing, now), None);
	}

	#[async_std::test]
	async fn expiry_date_uses_chain_history_depth() {
		let client = TestClient::from(TestClientData::minimal());
		let timing = timing(2400, 600, 6);
		let now = OffsetDateTime::UNIX_EPOCH;

		assert_eq!(
			reconciler(&client).expiry_date(9, &timing, now).await.unwrap(),
			era_expiry_date(9, 84, &timing, now),
		);
		assert!(client.queried("history_depth"));
	}

	#[async_std::test]
	async fn scan_reads_state_at_finalized_block() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());

		let rewards =
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await.unwrap();

		assert_eq!(rewards, expected_rewards());
		assert_eq!(client.data.lock().queries_of("best_finalized_block"), 1);
		assert_eq!(client.data.lock().unpinned_reads, Vec::<String>::new());
	}

	#[async_std::test]
	async fn scan_fails_without_finalized_block() {
		let client = TestClient::from(TestClientData::with_rewards_scenario());
		client.fail("best_finalized_block");

		assert!(matches!(
			reconciler(&client).find_unclaimed_rewards(&ALICE.into(), 10, TEST_CHAIN).await,
			Err(Error::Client(_)),
		));
		assert!(!client.queried("overview:9"));
	}
}
