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

//! Per-selection fetch flags.

use parking_lot::Mutex;
use std::{collections::HashSet, hash::Hash, sync::Arc};

/// Kind of data that is fetched for an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchKind {
	/// Staking position.
	Position,
	/// Unclaimed rewards.
	PendingRewards,
}

/// Set of (selection, kind) pairs that are being fetched right now.
///
/// `K` identifies the selection a fetch has been started for.
#[derive(Debug)]
pub struct InFlight<K> {
	fetches: Arc<Mutex<HashSet<(K, FetchKind)>>>,
}

impl<K> Default for InFlight<K> {
	fn default() -> Self {
		InFlight { fetches: Arc::new(Mutex::new(HashSet::new())) }
	}
}

impl<K> Clone for InFlight<K> {
	fn clone(&self) -> Self {
		InFlight { fetches: self.fetches.clone() }
	}
}

impl<K: Clone + Eq + Hash> InFlight<K> {
	/// Marks the fetch as started. Returns `None` if the same fetch is already running.
	///
	/// The fetch is marked as finished when the returned guard is dropped.
	pub fn try_acquire(&self, selection: &K, kind: FetchKind) -> Option<InFlightGuard<K>> {
		let key = (selection.clone(), kind);
		if !self.fetches.lock().insert(key.clone()) {
			return None
		}

		Some(InFlightGuard { fetches: self.fetches.clone(), key })
	}

	/// Returns `true` if the fetch is running.
	pub fn is_in_flight(&self, selection: &K, kind: FetchKind) -> bool {
		self.fetches.lock().contains(&(selection.clone(), kind))
	}
}

/// Running fetch. The fetch is marked as finished on drop.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash> {
	fetches: Arc<Mutex<HashSet<(K, FetchKind)>>>,
	key: (K, FetchKind),
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
	fn drop(&mut self) {
		self.fetches.lock().remove(&self.key);
	}
}
