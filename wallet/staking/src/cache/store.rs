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

//! Durable storage of position snapshots.

use crate::Result;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// String-keyed storage of JSON blobs.
#[async_trait]
pub trait PositionStore: Send + Sync + 'static {
	/// Reads the blob.
	async fn get(&self, key: &str) -> Result<Option<String>>;
	/// Writes the blob.
	async fn set(&self, key: &str, value: String) -> Result<()>;
	/// Subscribes to changes. The stream yields keys of changed blobs.
	fn subscribe(&self) -> UnboundedReceiver<String>;
}

/// In-memory store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	blobs: Arc<Mutex<HashMap<String, String>>>,
	subscribers: Arc<Mutex<Vec<UnboundedSender<String>>>>,
}

impl MemoryStore {
	/// Number of stored blobs.
	pub fn len(&self) -> usize {
		self.blobs.lock().len()
	}

	/// Returns `true` if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl PositionStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.blobs.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, value: String) -> Result<()> {
		self.blobs.lock().insert(key.into(), value);
		self.subscribers
			.lock()
			.retain(|subscriber| subscriber.unbounded_send(key.into()).is_ok());
		Ok(())
	}

	fn subscribe(&self) -> UnboundedReceiver<String> {
		let (sender, receiver) = unbounded();
		self.subscribers.lock().push(sender);
		receiver
	}
}
