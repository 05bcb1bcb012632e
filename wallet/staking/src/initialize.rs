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

//! Logger initialization.

use crate::LOG_TARGET;

use std::io::Write;

/// Initialize logger instance.
///
/// Warnings of all targets and info messages of the engine are logged by default. Use the
/// `RUST_LOG` environment variable to override that. Does nothing if a logger has been
/// installed already.
pub fn initialize_logger(with_timestamp: bool) {
	let format = time::format_description::parse(
		"[year]-[month]-[day] \
		[hour repr:24]:[minute]:[second] [offset_hour sign:mandatory]",
	)
	.expect("static format string is valid");

	let mut builder = env_logger::Builder::new();
	builder
		.filter_level(log::LevelFilter::Warn)
		.filter_module(LOG_TARGET, log::LevelFilter::Info)
		.parse_env(env_logger::Env::default());

	if with_timestamp {
		builder.format(move |buf, record| {
			let now = time::OffsetDateTime::now_local()
				.unwrap_or_else(|_| time::OffsetDateTime::now_utc());
			let timestamp = now.format(&format).unwrap_or_default();
			writeln!(buf, "{} {} {} {}", timestamp, record.level(), record.target(), record.args())
		});
	} else {
		builder.format(|buf, record| {
			writeln!(buf, "{} {} {}", record.level(), record.target(), record.args())
		});
	}

	let _ = builder.try_init();
}
