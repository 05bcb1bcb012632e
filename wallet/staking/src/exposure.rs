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

//! Exposure scan of recent eras, used to gate fast unstake.
//!
//! Fast unstake is only allowed for stashes that have not been exposed behind any validator
//! during the last `BondingDuration` eras. Both checks read chain state at the best finalized
//! block.

use crate::{
	client::StakingClient, AccountId, BlockHash, EngineConfig, EraIndex, Error, Result,
	LOG_TARGET,
};

use futures::StreamExt;

/// Fast unstake eligibility of a stash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastUnstakeEligibility {
	/// Transferable balance covers the fast unstake deposit.
	pub has_enough_deposit: bool,
	/// Ledger has no unlocking chunks.
	pub has_no_unlocking: bool,
	/// Stash has been exposed during the bonding duration.
	pub is_exposed: bool,
	/// Stash is already in the fast unstake queue.
	pub is_queued: bool,
}

impl FastUnstakeEligibility {
	/// Returns `true` if the stash may register for fast unstake.
	pub fn is_eligible(&self) -> bool {
		self.has_enough_deposit && self.has_no_unlocking && !self.is_exposed && !self.is_queued
	}
}

/// Returns `true` if the stash is a nominator behind any validator in the last
/// `bonding_duration` eras, ending with `current_era`.
///
/// Eras are scanned concurrently, at most `concurrency` at a time. Failed eras are logged and
/// skipped. If the stash has not been found and some eras have failed, the answer is unknown
/// and [`Error::Unavailable`] is returned.
pub async fn is_exposed<C: StakingClient>(
	client: &C,
	stash: &AccountId,
	bonding_duration: EraIndex,
	current_era: EraIndex,
	concurrency: usize,
) -> Result<bool> {
	let at = Some(client.best_finalized_block().await?);
	scan_exposures(client, stash, bonding_duration, current_era, concurrency, at).await
}

async fn scan_exposures<C: StakingClient>(
	client: &C,
	stash: &AccountId,
	bonding_duration: EraIndex,
	current_era: EraIndex,
	concurrency: usize,
	at: Option<BlockHash>,
) -> Result<bool> {
	let paged = client.has_paged_exposures().await?;
	let eras = (0..bonding_duration).filter_map(|i| current_era.checked_sub(i));
	let mut scans = futures::stream::iter(eras)
		.map(|era| async move { (era, is_exposed_at(client, stash, era, paged, at).await) })
		.buffer_unordered(concurrency.max(1));

	let mut failed_eras = 0;
	while let Some((era, result)) = scans.next().await {
		match result {
			Ok(true) => {
				log::debug!(target: LOG_TARGET, "Stash {} is exposed at era {}", stash, era);
				return Ok(true)
			},
			Ok(false) => (),
			Err(error) => {
				failed_eras += 1;
				log::warn!(target: LOG_TARGET, "Exposure scan of era {} has failed: {}", era, error);
			},
		}
	}

	if failed_eras != 0 {
		return Err(Error::Unavailable(format!(
			"exposure scan of {} eras has failed",
			failed_eras,
		)))
	}

	Ok(false)
}

/// Returns `true` if the stash is a nominator behind any validator at given era.
async fn is_exposed_at<C: StakingClient>(
	client: &C,
	stash: &AccountId,
	era: EraIndex,
	paged: bool,
	at: Option<BlockHash>,
) -> Result<bool> {
	if !paged {
		let exposures = client.eras_stakers(era, at).await?;
		return Ok(exposures
			.iter()
			.flat_map(|(_, exposure)| exposure.others.iter())
			.any(|nominator| nominator.who == *stash))
	}

	let overview = client.eras_stakers_overview(era, at).await?;
	let pages = futures::future::try_join_all(overview.iter().flat_map(|(validator, metadata)| {
		(0..metadata.page_count)
			.map(move |page| client.eras_stakers_paged(era, validator, page, at))
	}))
	.await?;

	Ok(pages
		.iter()
		.flatten()
		.flat_map(|page| page.others.iter())
		.any(|nominator| nominator.who == *stash))
}

/// Checks whether the stash may register for fast unstake.
pub async fn fast_unstake_eligibility<C: StakingClient>(
	client: &C,
	stash: &AccountId,
	current_era: EraIndex,
	config: &EngineConfig,
) -> Result<FastUnstakeEligibility> {
	let at = Some(client.best_finalized_block().await?);
	let (deposit, balances, ledger, is_queued, bonding_duration) = futures::try_join!(
		client.fast_unstake_deposit(),
		client.balances(stash, at),
		client.ledger(stash, at),
		client.fast_unstake_queued(stash, at),
		client.bonding_duration(),
	)?;
	let deposit =
		deposit.ok_or_else(|| Error::Unavailable("fast unstake is not supported".into()))?;

	let is_exposed = scan_exposures(
		client,
		stash,
		bonding_duration,
		current_era,
		config.era_fetch_concurrency,
		at,
	)
	.await?;

	Ok(FastUnstakeEligibility {
		has_enough_deposit: balances.free.saturating_sub(balances.frozen) >= deposit,
		has_no_unlocking: ledger.map_or(true, |ledger| ledger.unlocking.is_empty()),
		is_exposed,
		is_queued,
	})
}
