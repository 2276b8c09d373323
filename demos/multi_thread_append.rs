use std::io;
use std::sync::{Arc, Barrier};
use std::thread;

use eventlog::{open, same_record, EventLogError, Record, Timestamp};
use log::{info, warn};

const THREADS: usize = 4;
const TURNS: u32 = 3;

#[derive(Debug, PartialEq)]
struct TurnBegin {
    worker: usize,
    turn: u32,
}

impl Record for TurnBegin {
    fn id(&self) -> &'static str {
        "TurnBegin"
    }

    fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
        write!(out, "worker={} turn={}", self.worker, self.turn)
    }

    fn equals(&self, other: &dyn Record) -> bool {
        same_record(self, other)
    }
}

#[derive(Debug, PartialEq)]
struct TurnEnd {
    worker: usize,
    turn: u32,
}

impl Record for TurnEnd {
    fn id(&self) -> &'static str {
        "TurnEnd"
    }

    fn render(&self, out: &mut dyn io::Write, _start: Timestamp) -> io::Result<()> {
        write!(out, "worker={} turn={}", self.worker, self.turn)
    }

    fn equals(&self, other: &dyn Record) -> bool {
        same_record(self, other)
    }
}

pub fn main() -> Result<(), EventLogError> {
    env_logger::init();

    let (recorder, log) = open();

    let mut threads = Vec::with_capacity(THREADS);
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    for worker in 0..THREADS {
        let b = barrier.clone();
        let rec = recorder.clone();

        let thread = thread::spawn(move || {
            b.wait();

            for turn in 0..TURNS {
                rec.append(TurnBegin { worker, turn });
                rec.append_with(|| TurnEnd { worker, turn });
            }
        });

        threads.push(thread);
    }

    warn!("{} threads ready!", threads.len());
    barrier.wait();

    for thread in threads {
        thread.join().unwrap();
    }

    info!("{} entries recorded", log.len());

    log.print()
}
