use std::cmp::Ordering;
use std::io::{self, Write};
use std::time::Duration;

use crate::record::Record;

/// Monotonic clock reading.
pub type Timestamp = std::time::Instant;

/// An Entry pairs a record with the time it was observed.
///
/// The entry owns its record. It is handed out by reference only, and the record is released
/// when the log holding it is cleared or dropped.
#[derive(Debug)]
pub struct Entry {
    time: Timestamp,
    record: Box<dyn Record>,
}

impl Entry {
    /// Wrap a freshly built record, stamping it with the current time.
    pub(crate) fn now(record: Box<dyn Record>) -> Self {
        Entry {
            time: Timestamp::now(),
            record,
        }
    }

    #[inline]
    pub fn id(&self) -> &'static str {
        self.record.id()
    }

    #[inline]
    pub fn time(&self) -> Timestamp {
        self.time
    }

    #[inline]
    pub fn record(&self) -> &dyn Record {
        self.record.as_ref()
    }

    /// Typed access to the record, if it is an `R`.
    pub fn downcast_ref<R: Record + 'static>(&self) -> Option<&R> {
        self.record().as_any().downcast_ref::<R>()
    }

    /// Time elapsed between `start` and this entry. Zero if the entry predates `start`.
    pub fn elapsed_since(&self, start: Timestamp) -> Duration {
        self.time.saturating_duration_since(start)
    }

    /// Chronological comparison, for callers that need entries in time order rather than
    /// storage order.
    pub fn cmp_time(&self, other: &Entry) -> Ordering {
        self.time.cmp(&other.time)
    }

    /// Two entries are equal when they hold equal records. Timestamps are not compared.
    pub fn equals(&self, other: &Entry) -> bool {
        self.id() == other.id() && self.record.equals(other.record.as_ref())
    }

    /// Write this entry as a single line: `<elapsed>us <id> <payload>`.
    pub fn render(&self, out: &mut dyn Write, start: Timestamp) -> io::Result<()> {
        let mut payload = Vec::new();
        self.record.render(&mut payload, start)?;

        write!(
            out,
            "{}us {}",
            self.elapsed_since(start).as_micros(),
            self.id()
        )?;

        if !payload.is_empty() {
            out.write_all(b" ")?;
            out.write_all(&payload)?;
        }

        out.write_all(b"\n")
    }
}
