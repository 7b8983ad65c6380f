use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::state::{CanonicalRecord, EventID, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EventStats {
    pub occurrences: u64,
    pub closings: u64,
    pub min: Value,
    pub max: Value,
}

impl EventStats {
    fn new(value: Value) -> Self {
        EventStats {
            occurrences: 0,
            closings: 0,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: Value) {
        self.occurrences += 1;
        if value == 0 {
            self.closings += 1;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

pub fn accumulate_statistics(records: &[CanonicalRecord]) -> BTreeMap<EventID, EventStats> {
    let mut statistics = BTreeMap::new();
    for record in records {
        for (event, value) in &record.events {
            statistics
                .entry(*event)
                .or_insert_with(|| EventStats::new(*value))
                .add(*value);
        }
    }
    statistics
}

pub fn print_statistics(catalog: &Catalog, records: &[CanonicalRecord]) {
    let names: BTreeMap<_, _> = catalog
        .walk()
        .into_iter()
        .map(|idx| (catalog.id(idx), catalog.event(idx).name.as_str()))
        .collect();
    let statistics = accumulate_statistics(records);

    // Busiest events first
    let mut ordering = BTreeMap::<Reverse<u64>, Vec<EventID>>::new();
    for (event, stats) in &statistics {
        ordering
            .entry(Reverse(stats.occurrences))
            .or_default()
            .push(*event);
    }

    println!();
    println!("  -------------------------");
    println!("  Event Statistics ({} records)", records.len());
    println!("  -------------------------");
    for (_, events) in ordering {
        for event in events {
            let stats = statistics[&event];
            println!();
            match names.get(&event) {
                Some(name) => println!("      {} ({})", name, event),
                None => println!("      User event {}", event),
            }
            println!("          Occurrences: {}", stats.occurrences);
            println!("          Closing values: {}", stats.closings);
            println!("          Min value: {}", stats.min);
            println!("          Max value: {}", stats.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ThreadID, Timestamp};

    #[test]
    fn test_accumulate() {
        let mut a = CanonicalRecord::new(Timestamp(1), ThreadID(1));
        a.push(EventID(1), 5);
        a.push(EventID(2), 0);
        let mut b = CanonicalRecord::new(Timestamp(2), ThreadID(1));
        b.push(EventID(1), -3);
        b.push(EventID(1), 0);
        let statistics = accumulate_statistics(&[a, b]);
        assert_eq!(
            statistics[&EventID(1)],
            EventStats {
                occurrences: 3,
                closings: 1,
                min: -3,
                max: 5
            }
        );
        assert_eq!(statistics[&EventID(2)].closings, 1);
    }
}
