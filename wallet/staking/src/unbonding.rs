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

//! Unbonding schedule of a stash.

use crate::{client::UnlockChunk, era::EraTimingInfo, Balance, EraIndex};

use time::OffsetDateTime;

/// Balance that is being unbonded, together with number of eras until it is redeemable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnbondingChunk {
	/// Unbonded amount.
	pub amount: Balance,
	/// Number of era boundaries to cross before the amount is redeemable. Zero or negative
	/// if it is already redeemable.
	pub remaining_eras: i64,
}

impl UnbondingChunk {
	/// Converts ledger unlock chunk into unbonding chunk, relative to the active era.
	pub fn from_ledger(chunk: &UnlockChunk, active_era: EraIndex) -> Self {
		UnbondingChunk {
			amount: chunk.value,
			remaining_eras: i64::from(chunk.era) - i64::from(active_era),
		}
	}
}

/// Balance that will become redeemable at given moment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseEntry {
	/// Amount that will be released.
	pub amount: Balance,
	/// Estimated release moment.
	pub release_date: OffsetDateTime,
}

/// Unbonding schedule and totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnstakingSummary {
	/// Sum of all amounts that are not yet redeemable.
	pub total_unlocking: Balance,
	/// Sum of all amounts that may be withdrawn right now.
	pub total_redeemable: Balance,
	/// Pending releases, ordered by release date.
	pub schedule: Vec<ReleaseEntry>,
}

impl UnstakingSummary {
	/// Returns `true` if `total_unlocking` matches the schedule.
	pub fn is_consistent(&self) -> bool {
		self.schedule
			.iter()
			.try_fold(0 as Balance, |sum, entry| sum.checked_add(entry.amount))
			.map_or(false, |sum| sum == self.total_unlocking)
	}
}

/// Computes unbonding schedule of given chunks.
///
/// A chunk with `n > 0` remaining eras is released after the rest of the active era and
/// `n - 1` full eras have passed.
pub fn compute_unstaking(
	chunks: &[UnbondingChunk],
	timing: &EraTimingInfo,
	now: OffsetDateTime,
) -> UnstakingSummary {
	let mut summary = UnstakingSummary::default();
	for chunk in chunks {
		if chunk.remaining_eras <= 0 {
			summary.total_redeemable = summary.total_redeemable.saturating_add(chunk.amount);
			continue
		}

		let remaining_eras = u32::try_from(chunk.remaining_eras).unwrap_or(u32::MAX);
		summary.total_unlocking = summary.total_unlocking.saturating_add(chunk.amount);
		summary.schedule.push(ReleaseEntry {
			amount: chunk.amount,
			release_date: timing.date_after_eras(remaining_eras, now),
		});
	}

	summary.schedule.sort_by_key(|entry| entry.release_date);
	debug_assert!(summary.is_consistent());
	summary
}
