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

//! Era timing model.
//!
//! Converts raw session and era counters into era length, progress within the active era and
//! block time. All "how long until X" questions of the engine are answered through
//! [`EraTimingInfo::date_after_eras`].

use crate::{
	client::{SessionClient, StakingClient},
	BlockNumber, EraIndex, Error, Result, LOG_TARGET,
};

use time::OffsetDateTime;

/// Era timing snapshot, valid until the active era changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EraTimingInfo {
	/// Index of the active era.
	pub active_era: EraIndex,
	/// Era length in blocks.
	pub era_length: u64,
	/// Number of blocks since the active era has started.
	pub era_progress: u64,
	/// Session length in blocks.
	pub session_length: u64,
	/// Number of blocks since the current session has started.
	pub session_progress: u64,
	/// Block time in seconds.
	pub block_time: u64,
	/// Duration of the active era in milliseconds.
	pub active_era_duration: u64,
}

impl EraTimingInfo {
	/// Number of blocks left until the end of the active era.
	pub fn remaining_era_blocks(&self) -> u64 {
		self.era_length.saturating_sub(self.era_progress)
	}

	/// Number of blocks until the given number of era boundaries have been crossed.
	///
	/// One era boundary is the end of the active era, every next one adds a full era.
	pub fn blocks_until(&self, era_boundaries: u32) -> u64 {
		match era_boundaries {
			0 => 0,
			n => u64::from(n - 1)
				.saturating_mul(self.era_length)
				.saturating_add(self.remaining_era_blocks()),
		}
	}

	/// Moment when the given number of era boundaries have been crossed, counting from `now`.
	pub fn date_after_eras(&self, era_boundaries: u32, now: OffsetDateTime) -> OffsetDateTime {
		let seconds = self.blocks_until(era_boundaries).saturating_mul(self.block_time);
		now.saturating_add(time::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX)))
	}

	/// Active era progress, in percents.
	pub fn era_progress_percent(&self) -> u8 {
		if self.era_length == 0 {
			return 0
		}

		(self.era_progress.min(self.era_length) * 100 / self.era_length) as u8
	}
}

/// Derives era timing from chain constants and live counters.
///
/// `staking` reads the staking pallet, `session` reads session and block production state.
/// Both may be the same client. Fails with [`Error::Unavailable`] when the active era has not
/// started yet or is missing from the bonded eras. That may happen at era boundaries and
/// must be treated as "retry later".
pub async fn compute_era_timing<St: StakingClient, Se: SessionClient>(
	staking: &St,
	session: &Se,
) -> Result<EraTimingInfo> {
	let (active_era, bonded_eras, sessions_per_era) = futures::try_join!(
		staking.active_era(None),
		staking.bonded_eras(None),
		staking.sessions_per_era(),
	)?;
	let (session_length, current_session, current_block, expected_block_time, minimum_period) =
		futures::try_join!(
			session.session_length(),
			session.current_session_index(None),
			session.current_block_number(),
			session.expected_block_time(),
			session.minimum_period(),
		)?;

	let active_era = active_era
		.filter(|era| era.start.is_some())
		.ok_or_else(|| Error::Unavailable("active era has not started yet".into()))?;
	let era_start_session = bonded_eras
		.iter()
		.find(|(era, _)| *era == active_era.index)
		.map(|(_, session)| *session)
		.ok_or_else(|| {
			Error::Unavailable(format!("era {} is missing from bonded eras", active_era.index))
		})?;

	let block_time = block_time_secs(expected_block_time, minimum_period)?;
	let timing = derive_era_timing(
		active_era.index,
		u64::from(sessions_per_era),
		u64::from(session_length),
		u64::from(current_session.saturating_sub(era_start_session)),
		current_block,
		block_time,
	);

	log::trace!(
		target: LOG_TARGET,
		"Era {} progress: {}/{} blocks, block time {}s",
		timing.active_era,
		timing.era_progress,
		timing.era_length,
		timing.block_time,
	);

	Ok(timing)
}

/// Block time in seconds: the expected block time, or twice the minimum timestamp period.
fn block_time_secs(expected_block_time: Option<u64>, minimum_period: Option<u64>) -> Result<u64> {
	expected_block_time
		.filter(|ms| *ms > 0)
		.or_else(|| minimum_period.filter(|ms| *ms > 0).map(|ms| ms.saturating_mul(2)))
		.map(|ms| (ms / 1000).max(1))
		.ok_or_else(|| Error::Unavailable("block time constants are missing".into()))
}

fn derive_era_timing(
	active_era: EraIndex,
	sessions_per_era: u64,
	session_length: u64,
	sessions_since_era_start: u64,
	current_block: BlockNumber,
	block_time: u64,
) -> EraTimingInfo {
	let era_length = sessions_per_era.saturating_mul(session_length);
	let session_progress = match session_length {
		0 => 0,
		length => u64::from(current_block) % length,
	};
	let era_progress = sessions_since_era_start
		.saturating_mul(session_length)
		.saturating_add(session_progress);

	EraTimingInfo {
		active_era,
		era_length,
		era_progress,
		session_length,
		session_progress,
		block_time,
		active_era_duration: era_length.saturating_mul(block_time).saturating_mul(1000),
	}
}
