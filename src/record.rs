//! The capability every event type must provide to be stored in an `EventLog`.

use std::any::Any;
use std::fmt::Debug;
use std::io;

use crate::entry::Timestamp;

/// Access to a value as `Any`, so that records can be compared and downcast behind a `dyn Record`.
///
/// This is implemented for every `'static` type, there is no need to implement it by hand.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A Record describes one observed event.
///
/// Concrete records are defined by the system being observed; the log only needs to name them,
/// render them, and compare them.
///
/// # Examples
/// ```
/// use std::io;
/// use eventlog::{same_record, Record, Timestamp};
///
/// #[derive(Debug, PartialEq)]
/// struct Tick(u32);
///
/// impl Record for Tick {
///     fn id(&self) -> &'static str {
///         "Tick"
///     }
///
///     fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
///         write!(out, "n={}", self.0)
///     }
///
///     fn equals(&self, other: &dyn Record) -> bool {
///         same_record(self, other)
///     }
/// }
///
/// let a: Box<dyn Record> = Box::new(Tick(1));
/// let b: Box<dyn Record> = Box::new(Tick(1));
///
/// assert!(a.equals(b.as_ref()));
/// assert_eq!(a.id(), "Tick");
/// ```
pub trait Record: AsAny + Debug + Send + Sync {
    /// A stable name for the kind of event, e.g. `TurnStart`.
    fn id(&self) -> &'static str;

    /// Write the payload of the event.
    ///
    /// The elapsed time since `start` and the identifier are written by the log in front of it,
    /// and a line break after it. `start` is the log's start time, for records carrying instants
    /// of their own. A record without payload writes nothing.
    fn render(&self, out: &mut dyn io::Write, start: Timestamp) -> io::Result<()>;

    /// Deep comparison with another record.
    fn equals(&self, other: &dyn Record) -> bool;
}

/// Compare a record with another one of any type. Records of different types are never equal.
///
/// This is what most `Record::equals` implementations need.
pub fn same_record<R: Record + PartialEq + 'static>(this: &R, other: &dyn Record) -> bool {
    other
        .as_any()
        .downcast_ref::<R>()
        .map_or(false, |other| this == other)
}

impl PartialEq for dyn Record {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Start;

    impl Record for Start {
        fn id(&self) -> &'static str {
            "Start"
        }

        fn render(&self, _out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
            Ok(())
        }

        fn equals(&self, other: &dyn Record) -> bool {
            same_record(self, other)
        }
    }

    #[derive(Debug, PartialEq)]
    struct Value(i64);

    impl Record for Value {
        fn id(&self) -> &'static str {
            "Value"
        }

        fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
            write!(out, "{}", self.0)
        }

        fn equals(&self, other: &dyn Record) -> bool {
            same_record(self, other)
        }
    }

    #[test]
    fn test_same_type_equality() {
        let a: Box<dyn Record> = Box::new(Value(3));
        let b: Box<dyn Record> = Box::new(Value(3));
        let c: Box<dyn Record> = Box::new(Value(4));

        assert!(a.equals(b.as_ref()));
        assert!(!a.equals(c.as_ref()));
        assert!(*a == *b);
        assert!(*a != *c);
    }

    #[test]
    fn test_cross_type_inequality() {
        let a: Box<dyn Record> = Box::new(Start);
        let b: Box<dyn Record> = Box::new(Value(0));

        assert!(!a.equals(b.as_ref()));
        assert!(!b.equals(a.as_ref()));
    }

    #[test]
    fn test_render_payload() {
        let mut out = Vec::new();

        let start = Timestamp::now();

        Value(-7).render(&mut out, start).unwrap();
        Start.render(&mut out, start).unwrap();

        assert_eq!(out, b"-7");
    }
}
