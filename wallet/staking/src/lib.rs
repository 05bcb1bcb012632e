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

//! Staking position and reward reconciliation for wallets.
//!
//! Given read access to a staking chain (and, when staking lives elsewhere than session
//! management, to the relay chain), this crate computes:
//!
//! - era timing: era length, progress within the active era and block time;
//! - the unbonding schedule of a stash, with release dates and redeemable totals;
//! - whether a stash is exposed behind any validator in recent eras (fast unstake gating);
//! - rewards that are still claimable for a stash, net of validator commission;
//! - a cached, persisted position snapshot that is invalidated on era rollover and chain switch.
//!
//! Transaction building, signing and rendering are left to the caller.

#![warn(missing_docs)]

pub mod cache;
pub mod client;
pub mod config;
pub mod era;
pub mod error;
pub mod exposure;
pub mod initialize;
pub mod position;
pub mod rewards;
pub mod unbonding;

#[cfg(test)]
pub(crate) mod mock;

pub use cache::{CacheState, MemoryStore, PositionCache, PositionStore, RefreshOutcome};
pub use client::{SessionClient, StakingClient};
pub use config::EngineConfig;
pub use era::{compute_era_timing, EraTimingInfo};
pub use error::{Error, Result};
pub use exposure::{fast_unstake_eligibility, is_exposed, FastUnstakeEligibility};
pub use position::{
	fetch_position, Loadable, NominationStatus, PositionDraft, StakingPositionSnapshot,
};
pub use rewards::{era_expiry_date, PendingReward, PendingRewards, RewardReconciler, ScanProgress};
pub use unbonding::{compute_unstaking, ReleaseEntry, UnbondingChunk, UnstakingSummary};

/// Log target used by this crate.
pub const LOG_TARGET: &str = "staking";

/// Counter for the number of eras that have passed.
pub type EraIndex = u32;
/// Counter for the number of sessions that have passed.
pub type SessionIndex = u32;
/// Block number.
pub type BlockNumber = u32;
/// Index of a page of validator exposure.
pub type Page = u32;
/// Counter for the number of reward points earned by a validator.
pub type RewardPoint = u32;
/// Balance of an account, in the smallest token unit.
pub type Balance = u128;
/// SS58-encoded account address.
pub type AccountId = String;

/// Hash of a block, used to pin reads to a historical chain state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockHash(pub [u8; 32]);
