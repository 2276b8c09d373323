//! This module contains the implementation of the `EventLog` type.

use std::io::{self, Write};
use std::sync::Arc;

use log::{debug, trace};

use crate::entry::{Entry, Timestamp};
use crate::record::Record;
use crate::store::{Store, StoreIterator};
use crate::EventLogError;

/// An EventLog records timestamped events from any number of threads, and renders them later.
///
/// Appends are lock-free and never block each other. Events appended by a thread are kept in the
/// order that thread appended them; events from different threads are interleaved in whichever
/// order they were admitted, which is not necessarily the order of their timestamps.
///
/// Rendering (`print`, `write`) only needs a shared reference and may run while appends are still
/// happening; it then shows the entries admitted when the traversal began.
///
/// Clearing needs exclusive access (`&mut self`): nobody can append or read while it happens.
///
/// # Examples
/// ```
/// use std::io;
/// use eventlog::{same_record, EventLog, Record, Timestamp};
///
/// #[derive(Debug, PartialEq)]
/// struct TurnStart(u32);
///
/// impl Record for TurnStart {
///     fn id(&self) -> &'static str {
///         "TurnStart"
///     }
///
///     fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
///         write!(out, "turn={}", self.0)
///     }
///
///     fn equals(&self, other: &dyn Record) -> bool {
///         same_record(self, other)
///     }
/// }
///
/// let log = EventLog::new();
/// log.append(TurnStart(1));
/// log.append_with(|| TurnStart(2));
///
/// let mut out = Vec::new();
/// log.write(&mut out).unwrap();
///
/// let out = String::from_utf8(out).unwrap();
/// assert_eq!(out.lines().count(), 2);
/// assert!(out.contains("TurnStart turn=2"));
/// ```
#[derive(Debug)]
pub struct EventLog {
    entries: Store<Entry>,
    start: Timestamp,
}

impl EventLog {
    /// Create a new empty log. Elapsed times are measured from now.
    pub fn new() -> Self {
        EventLog {
            entries: Store::new(),
            start: Timestamp::now(),
        }
    }

    /// The time elapsed times are measured from.
    #[inline]
    pub fn start_time(&self) -> Timestamp {
        self.start
    }

    /// Number of entries in the log.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the log empty ?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an already built record.
    pub fn append<R: Record + 'static>(&self, record: R) {
        self.admit(Box::new(record));
    }

    /// Build a record and append it.
    /// The entry is timestamped right after the record is built.
    pub fn append_with<R, F>(&self, build: F)
    where
        R: Record + 'static,
        F: FnOnce() -> R,
    {
        self.admit(Box::new(build()));
    }

    /// Build a record with a fallible constructor and append it.
    ///
    /// If the constructor fails, its error is returned as is and nothing is appended.
    ///
    /// # Examples
    /// ```
    /// use std::io;
    /// use eventlog::{same_record, EventLog, Record, Timestamp};
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Node(u8);
    ///
    /// impl Record for Node {
    ///     fn id(&self) -> &'static str {
    ///         "Node"
    ///     }
    ///
    ///     fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
    ///         write!(out, "{}", self.0)
    ///     }
    ///
    ///     fn equals(&self, other: &dyn Record) -> bool {
    ///         same_record(self, other)
    ///     }
    /// }
    ///
    /// let log = EventLog::new();
    ///
    /// assert!(log.try_append_with(|| u8::try_from(300_u32).map(Node)).is_err());
    /// assert!(log.try_append_with(|| u8::try_from(30_u32).map(Node)).is_ok());
    /// assert_eq!(log.len(), 1);
    /// ```
    pub fn try_append_with<R, E, F>(&self, build: F) -> Result<(), E>
    where
        R: Record + 'static,
        F: FnOnce() -> Result<R, E>,
    {
        let record = build()?;
        self.admit(Box::new(record));

        Ok(())
    }

    fn admit(&self, record: Box<dyn Record>) {
        self.entries.push(Entry::now(record));
    }

    /// Get an entry by its position in storage order.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Iterate over the entries, in storage order.
    pub fn iter(&self) -> StoreIterator<'_, Entry> {
        self.entries.iter()
    }

    /// The entries sorted by timestamp. Entries with the same timestamp keep their storage order.
    pub fn by_time(&self) -> Vec<&Entry> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.cmp_time(b));

        entries
    }

    /// Render every entry on the standard output.
    pub fn print(&self) -> Result<(), EventLogError> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();

        self.write(&mut lock)?;
        lock.flush()?;

        Ok(())
    }

    /// Render every entry to the given sink, one line per entry, in storage order.
    ///
    /// A failing sink interrupts the rendering and its error is returned; the log is left as it
    /// was, so the call can be retried.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<(), EventLogError> {
        let mut written = 0;

        for entry in self.entries.iter() {
            entry.render(&mut *out, self.start)?;
            written += 1;
        }

        debug!("> event log: rendered {} entries", written);

        Ok(())
    }

    /// Release every entry. The start time is kept.
    pub fn clear(&mut self) {
        trace!("> event log: clear ({} entries)", self.len());

        self.entries.clear();
    }

    /// Release every entry, and measure elapsed times from now on.
    pub fn reset(&mut self) {
        self.clear();
        self.start = Timestamp::now();

        trace!("> event log: reset");
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Entry;
    type IntoIter = StoreIterator<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//
// Handle given to producers, so that the log does not need to be a global.
//

impl EventLog {
    /// Create a producer handle on a shared log.
    pub fn recorder(self: &Arc<Self>) -> Recorder {
        Recorder { log: self.clone() }
    }
}

/// Open a new shared log.
///
/// # Returns
/// A Recorder to hand over to producers, and the log itself.
pub fn open() -> (Recorder, Arc<EventLog>) {
    let log = Arc::new(EventLog::new());

    (log.recorder(), log)
}

/// Producer half of an EventLog.
///
/// The Recorder can be cloned, and the clones will all refer to the same log.
#[derive(Debug, Clone)]
pub struct Recorder {
    log: Arc<EventLog>,
}

impl Recorder {
    /// See [`EventLog::append`].
    pub fn append<R: Record + 'static>(&self, record: R) {
        self.log.append(record)
    }

    /// See [`EventLog::append_with`].
    pub fn append_with<R, F>(&self, build: F)
    where
        R: Record + 'static,
        F: FnOnce() -> R,
    {
        self.log.append_with(build)
    }

    /// See [`EventLog::try_append_with`].
    pub fn try_append_with<R, E, F>(&self, build: F) -> Result<(), E>
    where
        R: Record + 'static,
        F: FnOnce() -> Result<R, E>,
    {
        self.log.try_append_with(build)
    }

    /// Convert the Recorder into its inner log.
    pub fn into_inner(self) -> Arc<EventLog> {
        self.log
    }
}
