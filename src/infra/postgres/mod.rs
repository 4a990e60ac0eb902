//! PostgreSQL implementations for the shared, multi-instance deployment
//!
//! Every instance of the relay points at the same database; the conditional
//! insert and update statements here are the only coordination between them.

mod event_dedup;
mod link_store;

pub use event_dedup::*;
pub use link_store::*;

use chrono::{DateTime, Utc};

/// 4714-11-24 BC, the earliest instant a `TIMESTAMPTZ` can hold.
const PG_MIN_TIMESTAMP_SECS: i64 = -210_866_803_200;

/// Raise `ts` to the earliest value Postgres accepts. No stored row can
/// predate that bound, so `created_at < ts` keeps its meaning.
pub(crate) fn clamp_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(PG_MIN_TIMESTAMP_SECS, 0).map_or(ts, |floor| ts.max(floor))
}
