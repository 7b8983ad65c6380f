use std::fmt;

use derive_more::{Add, Display, From, Sub};
use num_enum::TryFromPrimitive;
use serde::Serialize;

// Make sure this is up to date with the Paraver trace format
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum RecordType {
    State = 1,
    Event = 2,
    Communication = 3,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Add, Sub, From, Display, Serialize,
)]
pub struct Timestamp(pub u64 /* ns */);

impl Timestamp {
    // Saturates at the end of time rather than wrapping.
    pub const fn next(self) -> Timestamp {
        Timestamp(self.0.saturating_add(1))
    }
    pub const fn offset(self, delta: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(delta))
    }
}

/// Value of the `core` column. Memory tiles and controllers log their own
/// ids in the same column, so this is really "timeline owner".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Serialize)]
pub struct CoreID(pub u64);

/// 1-based Paraver thread (and CPU) number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Serialize)]
pub struct ThreadID(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Serialize)]
pub struct EventID(pub u64);

pub type Value = i64;

/// One line of the output timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalRecord {
    pub kind: RecordType,
    pub time: Timestamp,
    pub thread: ThreadID,
    pub events: Vec<(EventID, Value)>,
}

impl CanonicalRecord {
    pub fn new(time: Timestamp, thread: ThreadID) -> Self {
        CanonicalRecord {
            kind: RecordType::Event,
            time,
            thread,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: EventID, value: Value) {
        self.events.push((event, value));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn value_of(&self, event: EventID) -> Option<Value> {
        self.events
            .iter()
            .rev()
            .find(|(id, _)| *id == event)
            .map(|(_, value)| *value)
    }

    pub fn sort_events(&mut self) {
        self.events.sort();
    }
}

impl fmt::Display for CanonicalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // cpu:appl:task:thread, with one CPU per thread and a single task
        write!(
            f,
            "{}:{}:1:1:{}:{}",
            self.kind as u8, self.thread, self.thread, self.time
        )?;
        for (event, value) in &self.events {
            write!(f, ":{}:{}", event, value)?;
        }
        Ok(())
    }
}

/// Collects canonical records as the encoder releases them, strictly in
/// non-decreasing time order.
pub trait RecordSink {
    fn emit(&mut self, record: CanonicalRecord) -> crate::error::Result<()>;
}

impl RecordSink for Vec<CanonicalRecord> {
    fn emit(&mut self, record: CanonicalRecord) -> crate::error::Result<()> {
        self.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line() {
        let mut record = CanonicalRecord::new(Timestamp(42), ThreadID(3));
        record.push(EventID(47100001), 7);
        record.push(EventID(47100002), -4);
        assert_eq!(record.to_string(), "2:3:1:1:3:42:47100001:7:47100002:-4");
    }

    #[test]
    fn test_timestamp_saturates() {
        assert_eq!(Timestamp(7).next(), Timestamp(8));
        assert_eq!(Timestamp(u64::MAX).next(), Timestamp(u64::MAX));
        assert_eq!(Timestamp(u64::MAX - 1).offset(5), Timestamp(u64::MAX));
    }

    #[test]
    fn test_sorted_events() {
        let mut record = CanonicalRecord::new(Timestamp(1), ThreadID(1));
        record.push(EventID(9), 1);
        record.push(EventID(3), 5);
        record.push(EventID(3), 2);
        record.sort_events();
        assert_eq!(
            record.events,
            vec![(EventID(3), 2), (EventID(3), 5), (EventID(9), 1)]
        );
    }

    #[test]
    fn test_record_type() {
        assert_eq!(RecordType::try_from(2u8).unwrap(), RecordType::Event);
        assert!(RecordType::try_from(7u8).is_err());
    }
}
