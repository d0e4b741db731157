// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-journal: durable key-indexed store for orchestrator records.
//!
//! Records are opaque JSON blobs keyed by (kind, id). Writes land in an
//! append-only WAL replayed into in-memory tables on open; a zstd snapshot
//! compacts the WAL once it grows. Writes that cross a lifecycle boundary
//! fsync before acknowledgement; everything else is best-effort.

mod snapshot;
mod store;
mod wal;

pub use snapshot::{Snapshot, Stored, Tables};
pub use store::{Durability, Journal, JournalError, RecordKind};
pub use wal::{Wal, WalEntry, WalOp};
