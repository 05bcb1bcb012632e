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

//! Staking engine errors.

use crate::{AccountId, EraIndex};
use std::time::Duration;

/// Result type used by the staking engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that may happen while computing a staking position.
///
/// None of them is fatal: the engine degrades to incomplete data which is completed on the
/// next refresh.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Client is not connected yet, or a required storage item is missing.
	#[error("Required chain data is unavailable: {0}")]
	Unavailable(String),
	/// A cross-field invariant of the chain data would be violated.
	#[error("Inconsistent chain data: {0}")]
	Inconsistent(String),
	/// Single item of a larger scan has failed.
	#[error("Failed to process validator {validator} at era {era}: {reason}")]
	PartialFailure {
		/// Era that was being scanned.
		era: EraIndex,
		/// Validator that was being scanned, if the failure is validator-specific.
		validator: AccountId,
		/// Underlying failure.
		reason: String,
	},
	/// Persisted snapshot has been computed for another era.
	#[error("Stored snapshot is for era {stored_era}, while the active era is {current_era}")]
	StaleState {
		/// Era the snapshot has been computed for.
		stored_era: EraIndex,
		/// Currently observed active era.
		current_era: EraIndex,
	},
	/// Chain client has failed to read or decode the data.
	#[error("Chain client error: {0}")]
	Client(String),
	/// Durable storage has failed.
	#[error("Storage error: {0}")]
	Storage(String),
	/// (De)serialization of a persisted blob has failed.
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	/// Fetch cycle has not completed in time.
	#[error("Fetch has not completed in {0:?}")]
	Timeout(Duration),
	/// Operation requires an account and chain to be selected.
	#[error("No account and chain are selected")]
	NoSelection,
}

impl Error {
	/// Returns `true` if the operation may succeed on the next refresh.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Error::Serialization(_) | Error::Inconsistent(_))
	}

	/// Wraps the error into [`Error::PartialFailure`] of the given era and validator.
	pub fn partial(self, era: EraIndex, validator: impl Into<AccountId>) -> Self {
		Error::PartialFailure { era, validator: validator.into(), reason: self.to_string() }
	}
}
