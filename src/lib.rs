//! A concurrent log of timestamped events.
//!
//! Producers on any number of threads append records to an [`EventLog`] without taking locks.
//! Later, the log renders every entry to the console or to any `io::Write` sink, one line per
//! entry, with the time elapsed since the log was created.

mod entry;
mod error;
mod log;
mod record;
pub mod store;
mod sync;

pub use crate::entry::{Entry, Timestamp};
pub use crate::error::EventLogError;
pub use crate::log::{open, EventLog, Recorder};
pub use crate::record::{same_record, AsAny, Record};
