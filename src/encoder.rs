use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};
use slice_group_by::GroupBy;

use crate::catalog::{Catalog, Category, EventIdx, KindBinding};
use crate::disasm::{self, DecoderState, InstructionSlots};
use crate::error::{Error, Result};
use crate::num_util::{parse_hex, parse_int_auto, parse_radix};
use crate::state::{CanonicalRecord, CoreID, RecordSink, ThreadID, Timestamp, Value};
use crate::symbols::SymbolTable;
use crate::trace::{Trace, TraceRow, column};

const RAW_REASON: &str = "raw";
const RAW_LABEL: &str = "raw/resource unavailable";
const RESUME_LABEL: &str = "resume";
const UNKNOWN_REASON: &str = "unknown_reason";

#[derive(Debug, Copy, Clone)]
pub struct EncoderOptions {
    pub sort_events: bool,
    pub offsets_with_delay: bool,
    pub time_between_instructions: u64,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            sort_events: false,
            offsets_with_delay: false,
            time_between_instructions: 1,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub rows: usize,
    pub skipped: usize,
    // distinct event kinds missing from the catalog, each warned about once
    pub unknown_kinds: usize,
    pub records: usize,
    pub last_time: Option<Timestamp>,
}

/// Records waiting for their timestamp to be complete, ordered by time and
/// then by core.
#[derive(Debug, Default)]
pub struct Timeline {
    records: BTreeMap<(Timestamp, CoreID), CanonicalRecord>,
}

impl Timeline {
    pub fn record(&mut self, time: Timestamp, core: CoreID, thread: ThreadID) -> &mut CanonicalRecord {
        self.records
            .entry((time, core))
            .or_insert_with(|| CanonicalRecord::new(time, thread))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Emits every buffered record strictly before `before`, or everything
    /// when `before` is `None`. Records without events are dropped.
    pub fn flush<S: RecordSink>(
        &mut self,
        before: Option<Timestamp>,
        sort: bool,
        sink: &mut S,
        stats: &mut EncodeStats,
    ) -> Result<()> {
        let rest = match before {
            Some(time) => self.records.split_off(&(time, CoreID(0))),
            None => BTreeMap::new(),
        };
        let ready = std::mem::replace(&mut self.records, rest);
        for (_, mut record) in ready {
            if record.is_empty() {
                continue;
            }
            if sort {
                record.sort_events();
            }
            stats.records += 1;
            stats.last_time = Some(record.time);
            sink.emit(record)?;
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone)]
struct PendingInterval {
    opened_at: Timestamp,
    miss: bool,
    thread: ThreadID,
}

pub struct Encoder<'a> {
    catalog: &'a mut Catalog,
    symbols: Option<&'a SymbolTable>,
    options: EncoderOptions,
    instruction_slots: BTreeMap<EventIdx, InstructionSlots>,
    object_ids: BTreeMap<EventIdx, Vec<Value>>,
    resolved: HashMap<u64, usize>,
    threads: BTreeMap<CoreID, ThreadID>,
    decoders: BTreeMap<CoreID, DecoderState>,
    offsets_open: BTreeSet<CoreID>,
    // cache intervals keyed by (cache root, core)
    pending: BTreeMap<(EventIdx, CoreID), PendingInterval>,
    timeline: Timeline,
    header_width: usize,
    checked: BTreeSet<Category>,
    unknown: BTreeSet<String>,
    stats: EncodeStats,
}

impl<'a> Encoder<'a> {
    pub fn new(
        catalog: &'a mut Catalog,
        symbols: Option<&'a SymbolTable>,
        options: EncoderOptions,
    ) -> Self {
        let instruction_slots: BTreeMap<_, _> = catalog
            .roots_with_category(Category::Instruction)
            .map(|root| (root, InstructionSlots::new(catalog, root)))
            .collect();

        let stall_roots: Vec<_> = catalog.roots_with_category(Category::Stall).collect();
        for root in stall_roots {
            catalog.register_value(root, RESUME_LABEL);
        }

        let mut object_ids = BTreeMap::new();
        if let Some(symbols) = symbols {
            let labels = symbols.labels();
            for event in catalog.object_events() {
                let ids: Vec<Value> = labels
                    .iter()
                    .map(|label| catalog.register_value(event, label))
                    .collect();
                object_ids.insert(event, ids);
            }
        }

        Encoder {
            catalog,
            symbols,
            options,
            instruction_slots,
            object_ids,
            resolved: HashMap::new(),
            threads: BTreeMap::new(),
            decoders: BTreeMap::new(),
            offsets_open: BTreeSet::new(),
            pending: BTreeMap::new(),
            timeline: Timeline::default(),
            header_width: 0,
            checked: BTreeSet::new(),
            unknown: BTreeSet::new(),
            stats: EncodeStats::default(),
        }
    }

    /// Number of distinct cores, i.e. output threads, of the last trace.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn assign_threads(&mut self, rows: &[TraceRow]) {
        let cores: BTreeSet<_> = rows.iter().map(|row| row.core).collect();
        self.threads = cores
            .into_iter()
            .zip(1..)
            .map(|(core, thread)| (core, ThreadID(thread)))
            .collect();
    }

    pub fn encode<S: RecordSink>(&mut self, trace: &mut Trace, sink: &mut S) -> Result<EncodeStats> {
        trace.sort();
        self.header_width = trace.header.len();
        self.assign_threads(&trace.rows);

        let runs: Vec<&[TraceRow]> = trace.rows.linear_group_by_key(|row| row.time).collect();
        for (i, run) in runs.iter().enumerate() {
            let time = run[0].time;
            for row in run.iter() {
                self.stats.rows += 1;
                self.encode_row(row)?;
            }
            let next = runs.get(i + 1).map(|run| run[0].time);
            self.advance(time, next, sink)?;
        }
        Ok(self.stats)
    }

    /// Called once every row at `time` is encoded and before the rows at
    /// `next`. Closes cache intervals that did not continue on the following
    /// timestamp and releases every record before `next`.
    fn advance<S: RecordSink>(
        &mut self,
        time: Timestamp,
        next: Option<Timestamp>,
        sink: &mut S,
    ) -> Result<()> {
        let closing: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                p.opened_at < time || (p.opened_at == time && next != Some(time.next()))
            })
            .map(|(key, _)| *key)
            .collect();
        for key in closing {
            if let Some(interval) = self.pending.remove(&key) {
                self.close_interval(key, interval);
            }
        }
        self.timeline
            .flush(next, self.options.sort_events, sink, &mut self.stats)
    }

    fn close_interval(&mut self, (root, core): (EventIdx, CoreID), interval: PendingInterval) {
        let record = self
            .timeline
            .record(interval.opened_at.next(), core, interval.thread);
        if interval.miss {
            record.push(self.catalog.id(root), 0);
        }
        record.push(self.catalog.id(self.catalog.slot(root, 0)), 0);
        if self.symbols.is_some() {
            record.push(self.catalog.id(self.catalog.slot(root, 1)), 0);
        }
    }

    fn encode_row(&mut self, row: &TraceRow) -> Result<()> {
        let Some(binding) = self.catalog.binding(row.kind()) else {
            if self.unknown.insert(row.kind().to_owned()) {
                self.stats.unknown_kinds += 1;
                warn!("event kind {:?} is not configured, skipping its rows", row.kind());
            }
            self.stats.skipped += 1;
            return Ok(());
        };

        let schema = binding.category.schema();
        if self.checked.insert(binding.category) {
            schema.check_header(self.header_width)?;
        }
        if !schema.fits(row) {
            warn!(
                "dropping {} row at time {}: {} fields, expected {}",
                row.kind(),
                row.time,
                row.len(),
                schema.width()
            );
            self.stats.skipped += 1;
            return Ok(());
        }

        let thread = self.threads[&row.core];
        match binding.category {
            Category::Instruction => self.encode_instruction(row, binding, thread),
            Category::Cache => {
                self.encode_cache(row, binding, thread);
                Ok(())
            }
            Category::Stall => {
                self.encode_stall(row, binding, thread);
                Ok(())
            }
            Category::Request => {
                self.encode_request(row, binding, thread);
                Ok(())
            }
            Category::Bank => {
                self.encode_bank(row, binding, thread);
                Ok(())
            }
            Category::Counter => {
                self.encode_counter(row, binding, thread);
                Ok(())
            }
        }
    }

    fn object_value(&mut self, event: EventIdx, address: Value) -> Option<Value> {
        let symbols = self.symbols?;
        let address = address as u64;
        let index = *self
            .resolved
            .entry(address)
            .or_insert_with(|| symbols.resolve(address) as usize);
        self.object_ids
            .get(&event)
            .and_then(|ids| ids.get(index))
            .copied()
    }

    fn encode_instruction(
        &mut self,
        row: &TraceRow,
        binding: KindBinding,
        thread: ThreadID,
    ) -> Result<()> {
        let Some(slots) = self.instruction_slots.get(&binding.root).copied() else {
            return Ok(());
        };
        let text = row.payload(Category::Instruction);
        if text.trim().is_empty() {
            warn!("dropping instruction row at time {}: no disassembly", row.time);
            self.stats.skipped += 1;
            return Ok(());
        }
        let record = self.timeline.record(row.time, row.core, thread);
        match parse_hex(row.field(column::PC)) {
            Some(pc) => record.push(
                self.catalog.id(slots.pc),
                self.catalog.event(slots.pc).scale(pc),
            ),
            None => debug!("no program counter at time {}", row.time),
        }

        let previous = self.decoders.remove(&row.core).unwrap_or_default();
        let current = disasm::decode(
            previous,
            &text,
            &slots,
            &mut *self.catalog,
            record,
        );
        self.decoders.insert(row.core, current);

        self.encode_offsets(row, &slots, thread)
    }

    fn encode_offsets(&mut self, row: &TraceRow, slots: &InstructionSlots, thread: ThreadID) -> Result<()> {
        let mut offsets = Vec::new();
        for token in row
            .field(column::DETAIL)
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            match parse_int_auto(token) {
                Some(offset) => offsets.push(offset),
                None => warn!(
                    "ignoring malformed element offset {:?} at time {}",
                    token, row.time
                ),
            }
        }

        let valid = slots.offsets;
        let children = &self.catalog.event(valid).children;
        if self.options.offsets_with_delay {
            if offsets.is_empty() {
                return Ok(());
            }
            let spacing = self.options.time_between_instructions;
            if offsets.len() as u64 >= spacing {
                return Err(Error::OffsetSpacing {
                    time: row.time.0,
                    offsets: offsets.len(),
                    spacing,
                });
            }
            let Some(first) = children.first().copied() else {
                return Err(Error::OffsetSlots {
                    time: row.time.0,
                    offsets: offsets.len(),
                    slots: 0,
                });
            };
            let id = self.catalog.id(first);
            let event = self.catalog.event(first);
            for (k, offset) in offsets.iter().enumerate() {
                self.timeline
                    .record(row.time.offset(k as u64), row.core, thread)
                    .push(id, event.scale(*offset));
            }
            self.timeline
                .record(row.time.offset(offsets.len() as u64), row.core, thread)
                .push(id, 0);
        } else {
            let record = self.timeline.record(row.time, row.core, thread);
            if !offsets.is_empty() {
                if offsets.len() > children.len() {
                    return Err(Error::OffsetSlots {
                        time: row.time.0,
                        offsets: offsets.len(),
                        slots: children.len(),
                    });
                }
                record.push(self.catalog.id(valid), 1);
                for (child, offset) in children.iter().zip(&offsets) {
                    record.push(
                        self.catalog.id(*child),
                        self.catalog.event(*child).scale(*offset),
                    );
                }
                self.offsets_open.insert(row.core);
            } else if self.offsets_open.remove(&row.core) {
                record.push(self.catalog.id(valid), 0);
            }
        }
        Ok(())
    }

    fn encode_cache(&mut self, row: &TraceRow, binding: KindBinding, thread: ThreadID) {
        let root = binding.root;
        let Some(address) = parse_hex(&row.payload(Category::Cache)) else {
            warn!("dropping {} row at time {}: bad address", row.kind(), row.time);
            self.stats.skipped += 1;
            return;
        };
        let miss = row.kind().ends_with("_miss");
        let address_event = self.catalog.slot(root, 0);
        let object_event = self.catalog.slot(root, 1);
        let object = self.object_value(object_event, address);

        let record = self.timeline.record(row.time, row.core, thread);
        record.push(self.catalog.id(root), miss as Value);
        record.push(
            self.catalog.id(address_event),
            self.catalog.event(address_event).scale(address),
        );
        if let Some(object) = object {
            record.push(self.catalog.id(object_event), object);
        }
        self.pending.insert(
            (root, row.core),
            PendingInterval {
                opened_at: row.time,
                miss,
                thread,
            },
        );
    }

    fn encode_stall(&mut self, row: &TraceRow, binding: KindBinding, thread: ThreadID) {
        let root = binding.root;
        let payload = row.payload(Category::Stall);

        // resume kinds that carry who woke the core up
        if binding.event != root {
            let resume = self.catalog.register_value(root, RESUME_LABEL);
            let detail = self.catalog.event(binding.event);
            let value = parse_radix(&payload, detail.radix).map(|v| detail.scale(v));
            let record = self.timeline.record(row.time, row.core, thread);
            record.push(self.catalog.id(root), resume);
            if let Some(value) = value {
                record.push(self.catalog.id(binding.event), value);
            }
            return;
        }

        let label = match row.kind() {
            "stall" if payload == RAW_REASON => RAW_LABEL,
            "stall" if payload.is_empty() => UNKNOWN_REASON,
            "stall" => payload.as_str(),
            "resume" => RESUME_LABEL,
            marker => marker,
        };
        let value = self.catalog.register_value(root, label);
        self.timeline
            .record(row.time, row.core, thread)
            .push(self.catalog.id(root), value);
    }

    fn encode_request(&mut self, row: &TraceRow, binding: KindBinding, thread: ThreadID) {
        let root = binding.root;
        let detail_event = self.catalog.slot(root, 0);
        let address_event = self.catalog.slot(root, 1);
        let object_event = self.catalog.slot(root, 2);

        let stage = self.catalog.register_value(root, row.kind());
        let detail = parse_int_auto(row.field(column::DETAIL));
        let address = parse_hex(&row.payload(Category::Request));
        let object = address.and_then(|address| self.object_value(object_event, address));

        let record = self.timeline.record(row.time, row.core, thread);
        record.push(self.catalog.id(root), stage);
        if let Some(detail) = detail {
            record.push(
                self.catalog.id(detail_event),
                self.catalog.event(detail_event).scale(detail),
            );
        }
        if let Some(address) = address {
            record.push(
                self.catalog.id(address_event),
                self.catalog.event(address_event).scale(address),
            );
        }
        if let Some(object) = object {
            record.push(self.catalog.id(object_event), object);
        }
    }

    fn encode_bank(&mut self, row: &TraceRow, binding: KindBinding, thread: ThreadID) {
        let root = binding.root;
        let address_event = self.catalog.slot(root, 0);
        let object_event = self.catalog.slot(root, 1);

        let bank = self
            .catalog
            .register_value(root, &format!("bank {}", row.field(column::DETAIL)));
        let address = parse_hex(&row.payload(Category::Bank));
        let object = address.and_then(|address| self.object_value(object_event, address));

        let record = self.timeline.record(row.time, row.core, thread);
        record.push(self.catalog.id(root), bank);
        if let Some(address) = address {
            record.push(
                self.catalog.id(address_event),
                self.catalog.event(address_event).scale(address),
            );
        }
        if let Some(object) = object {
            record.push(self.catalog.id(object_event), object);
        }
    }

    fn encode_counter(&mut self, row: &TraceRow, binding: KindBinding, thread: ThreadID) {
        let event = self.catalog.event(binding.event);
        let payload = row.payload(Category::Counter);
        match parse_radix(&payload, event.radix) {
            Some(value) => {
                let value = event.scale(value);
                self.timeline
                    .record(row.time, row.core, thread)
                    .push(event.id, value);
            }
            None => {
                warn!(
                    "dropping {} row at time {}: bad value {:?}",
                    row.kind(),
                    row.time,
                    payload
                );
                self.stats.skipped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_NAMESPACE;
    use crate::state::EventID;
    use crate::trace::read_trace_from;

    const HEADER: &str = "timestamp,core,pc,event_type,id,address\n";

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default_coyote().unwrap();
        catalog.standardize_ids(DEFAULT_NAMESPACE).unwrap();
        catalog
    }

    fn encode_with(
        catalog: &mut Catalog,
        symbols: Option<&SymbolTable>,
        options: EncoderOptions,
        body: &str,
    ) -> Result<Vec<CanonicalRecord>> {
        let mut trace = read_trace_from(format!("{}{}", HEADER, body).as_bytes())?;
        let mut records = Vec::new();
        Encoder::new(catalog, symbols, options).encode(&mut trace, &mut records)?;
        Ok(records)
    }

    fn encode(catalog: &mut Catalog, body: &str) -> Vec<CanonicalRecord> {
        encode_with(catalog, None, EncoderOptions::default(), body).unwrap()
    }

    fn id(catalog: &Catalog, name: &str) -> EventID {
        catalog.id(catalog.find(name).unwrap())
    }

    #[test]
    fn test_row_ordering() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "5,0,0,stall,0,raw\n1,0,0,stall,0,mshrs\n3,0,0,resume,0,0\n",
        );
        let times: Vec<_> = records.iter().map(|r| r.time.0).collect();
        assert_eq!(times, vec![1, 3, 5]);
    }

    #[test]
    fn test_same_time_merged() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "4,0,0,stall,0,raw\n4,1,0,KI,0,0\n4,0,0,noc_message_src,0,3\n",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].thread, ThreadID(1));
        assert_eq!(records[0].events.len(), 2);
        assert_eq!(records[1].thread, ThreadID(2));
    }

    #[test]
    fn test_stall_labels() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,0,0,stall,0,raw\n2,0,0,stall,0,mshrs\n3,0,0,resume,0,0\n4,0,0,stall,0,raw\n",
        );
        let stall = id(&catalog, "Core stall");
        let values: Vec<_> = records.iter().map(|r| r.value_of(stall).unwrap()).collect();
        assert_eq!(values, vec![1, 2, 0, 1]);
        let root = catalog.find("Core stall").unwrap();
        assert_eq!(catalog.lookup_value(root, "resume"), Some(0));
        assert_eq!(catalog.lookup_value(root, RAW_LABEL), Some(1));
        assert_eq!(catalog.lookup_value(root, "raw"), None);
    }

    #[test]
    fn test_resume_detail() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, "7,2,0,resume_mc,0,1f\n8,2,0,KI,0,0\n");
        assert_eq!(records[0].value_of(id(&catalog, "Core stall")), Some(0));
        assert_eq!(
            records[0].value_of(id(&catalog, "Resumed by memory controller")),
            Some(0x1f)
        );
        let root = catalog.find("Core stall").unwrap();
        assert_eq!(
            records[1].value_of(id(&catalog, "Core stall")),
            catalog.lookup_value(root, "KI")
        );
    }

    #[test]
    fn test_cache_interval_closed() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, "10,0,0,l1_miss,0,1000\n20,0,0,KI,0,0\n");
        let miss = id(&catalog, "L1 data cache miss");
        let address = id(&catalog, "L1 access address");
        let times: Vec<_> = records.iter().map(|r| r.time.0).collect();
        assert_eq!(times, vec![10, 11, 20]);
        assert_eq!(records[0].value_of(miss), Some(1));
        assert_eq!(records[0].value_of(address), Some(0x1000));
        assert_eq!(records[1].value_of(miss), Some(0));
        assert_eq!(records[1].value_of(address), Some(0));
    }

    #[test]
    fn test_cache_interval_continues() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "10,0,0,l1_miss,0,1000\n11,0,0,l1_miss,0,2000\n12,0,0,stall,0,raw\n",
        );
        let miss = id(&catalog, "L1 data cache miss");
        let address = id(&catalog, "L1 access address");
        let times: Vec<_> = records.iter().map(|r| r.time.0).collect();
        assert_eq!(times, vec![10, 11, 12]);
        assert_eq!(records[1].value_of(miss), Some(1));
        assert_eq!(records[1].value_of(address), Some(0x2000));
        // closing lands on the existing row at 12
        assert_eq!(records[2].value_of(miss), Some(0));
        assert_eq!(records[2].value_of(address), Some(0));
    }

    #[test]
    fn test_cache_interval_at_end_of_time() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, &format!("{},0,0,l1_miss,0,1000\n", u64::MAX));
        let miss = id(&catalog, "L1 data cache miss");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, Timestamp(u64::MAX));
        assert_eq!(records[0].value_of(miss), Some(0));
    }

    #[test]
    fn test_cache_interval_other_kind_next() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, "10,0,0,l2_miss,0,40\n11,0,0,l1_hit,0,80\n");
        let l2 = id(&catalog, "L2 cache miss");
        let l1 = id(&catalog, "L1 data cache miss");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].time, Timestamp(11));
        assert_eq!(records[1].value_of(l2), Some(0));
        assert_eq!(records[1].value_of(l1), Some(0));
        assert_eq!(records[2].time, Timestamp(12));
        // a hit only closes its address
        assert_eq!(records[2].value_of(l1), None);
        assert_eq!(records[2].value_of(id(&catalog, "L1 access address")), Some(0));
    }

    #[test]
    fn test_memory_objects() {
        let symbols = SymbolTable::parse("1000 10 B buf\n");
        let mut catalog = catalog();
        let records = encode_with(
            &mut catalog,
            Some(&symbols),
            EncoderOptions::default(),
            "1,0,0,l2_miss,0,1004\n5,0,0,l2_miss,0,2000\n",
        )
        .unwrap();
        let object = id(&catalog, "L2 access memory object");
        let event = catalog.find("L2 access memory object").unwrap();
        assert_eq!(records[0].value_of(object), catalog.lookup_value(event, "buf"));
        assert_eq!(records[1].value_of(object), Some(0));
        assert_eq!(records[2].value_of(object), catalog.lookup_value(event, "Other"));
        assert_eq!(catalog.lookup_value(event, "None"), Some(0));
    }

    #[test]
    fn test_no_symbols_no_objects() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, "1,0,0,bank_operation,3,1004\n");
        let object = id(&catalog, "Memory bank memory object");
        assert_eq!(records[0].value_of(object), None);
        let root = catalog.find("Memory bank operation").unwrap();
        assert_eq!(
            records[0].value_of(id(&catalog, "Memory bank operation")),
            catalog.lookup_value(root, "bank 3")
        );
        assert_eq!(
            records[0].value_of(id(&catalog, "Memory bank address")),
            Some(0x1004)
        );
    }

    #[test]
    fn test_request_stage() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,0,0,l2_read,64,80001000\n2,0,0,memory_request,2,80001000\n",
        );
        let root = catalog.find("Memory request stage").unwrap();
        let stage = id(&catalog, "Memory request stage");
        assert_eq!(records[0].value_of(stage), catalog.lookup_value(root, "l2_read"));
        assert_eq!(records[0].value_of(id(&catalog, "Memory request detail")), Some(64));
        assert_eq!(records[1].value_of(stage), Some(2));
    }

    #[test]
    fn test_counter_radix() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,4,0,mem_tile_vecop_recv,0,ff\n2,4,0,mem_tile_vvl,0,16\n",
        );
        assert_eq!(
            records[0].value_of(id(&catalog, "Memory tile vector op received")),
            Some(255)
        );
        assert_eq!(records[1].value_of(id(&catalog, "Memory tile VVL")), Some(16));
    }

    #[test]
    fn test_unknown_kind_skipped() {
        let mut catalog = catalog();
        let mut trace = read_trace_from(
            format!(
                "{}1,0,0,bogus,0,0\n2,0,0,bogus,0,0\n2,1,0,other,0,0\n3,0,0,KI,0,0\n",
                HEADER
            )
            .as_bytes(),
        )
        .unwrap();
        let mut records = Vec::new();
        let stats = Encoder::new(&mut catalog, None, EncoderOptions::default())
            .encode(&mut trace, &mut records)
            .unwrap();
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.unknown_kinds, 2);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.last_time, Some(Timestamp(3)));
    }

    #[test]
    fn test_thread_assignment() {
        let mut catalog = catalog();
        let records = encode(&mut catalog, "1,7,0,KI,0,0\n2,3,0,KI,0,0\n");
        assert_eq!(records[0].thread, ThreadID(2));
        assert_eq!(records[1].thread, ThreadID(1));
    }

    #[test]
    fn test_instruction_row() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,0,80000000,instruction,,addi a0,a0,1\n2,0,80000004,instruction,,sw a0,8(sp)\n",
        );
        assert_eq!(
            records[0].value_of(id(&catalog, "Program counter")),
            Some(0x80000000)
        );
        let dest = catalog.find("Destination register").unwrap();
        assert_eq!(
            records[1].value_of(catalog.id(dest)),
            catalog.lookup_value(dest, "a0")
        );
        assert_eq!(records[1].value_of(id(&catalog, "Address offset")), Some(8));
    }

    #[test]
    fn test_empty_disassembly_dropped() {
        let mut catalog = catalog();
        let mut trace = read_trace_from(
            format!("{}1,0,80000000,instruction,,\n2,0,80000004,instruction,,nop\n", HEADER)
                .as_bytes(),
        )
        .unwrap();
        let mut records = Vec::new();
        let stats = Encoder::new(&mut catalog, None, EncoderOptions::default())
            .encode(&mut trace, &mut records)
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, Timestamp(2));
        let opcode = catalog.find("Opcode").unwrap();
        assert_eq!(catalog.lookup_value(opcode, ""), None);
        assert_eq!(catalog.lookup_value(opcode, "nop"), Some(1));
    }

    #[test]
    fn test_decoder_state_per_core() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,0,0,instruction,,addi a0,a0,1\n2,1,0,instruction,,nop\n3,0,0,instruction,,nop\n",
        );
        let dest = catalog.find("Destination register").unwrap();
        assert_eq!(records[1].value_of(catalog.id(dest)), Some(0));
        assert_eq!(
            records[2].value_of(catalog.id(dest)),
            catalog.lookup_value(dest, "a0")
        );
    }

    #[test]
    fn test_offsets() {
        let mut catalog = catalog();
        let records = encode(
            &mut catalog,
            "1,0,0,instruction,0;4;0x8,vle32.v v1,(a0)\n2,0,0,instruction,,nop\n",
        );
        let valid = id(&catalog, "Valid element offsets");
        assert_eq!(records[0].value_of(valid), Some(1));
        assert_eq!(records[0].value_of(id(&catalog, "Element offset 1")), Some(4));
        assert_eq!(records[0].value_of(id(&catalog, "Element offset 2")), Some(8));
        assert_eq!(records[1].value_of(valid), Some(0));
    }

    #[test]
    fn test_too_many_offsets() {
        let mut catalog = catalog();
        let offsets: Vec<_> = (0..300).map(|i| i.to_string()).collect();
        let body = format!("1,0,0,instruction,{},vle32.v v1,(a0)\n", offsets.join(";"));
        let result = encode_with(&mut catalog, None, EncoderOptions::default(), &body);
        assert!(matches!(
            result,
            Err(Error::OffsetSlots {
                offsets: 300,
                slots: 256,
                ..
            })
        ));
    }

    #[test]
    fn test_delayed_offsets() {
        let mut catalog = catalog();
        let options = EncoderOptions {
            offsets_with_delay: true,
            time_between_instructions: 4,
            ..Default::default()
        };
        let records = encode_with(
            &mut catalog,
            None,
            options,
            "10,0,0,instruction,16;32,vle32.v v1,(a0)\n14,0,0,instruction,,nop\n",
        )
        .unwrap();
        let offset = id(&catalog, "Element offset 0");
        let timeline: Vec<_> = records
            .iter()
            .filter_map(|r| r.value_of(offset).map(|v| (r.time.0, v)))
            .collect();
        assert_eq!(timeline, vec![(10, 16), (11, 32), (12, 0)]);
    }

    #[test]
    fn test_offset_spacing_violation() {
        let mut catalog = catalog();
        let options = EncoderOptions {
            offsets_with_delay: true,
            time_between_instructions: 2,
            ..Default::default()
        };
        let result = encode_with(
            &mut catalog,
            None,
            options,
            "10,0,0,instruction,0;4;8,vle32.v v1,(a0)\n",
        );
        assert!(matches!(
            result,
            Err(Error::OffsetSpacing {
                time: 10,
                offsets: 3,
                spacing: 2
            })
        ));
    }

    #[test]
    fn test_schema_too_narrow() {
        let mut catalog = catalog();
        let mut trace =
            read_trace_from("timestamp,core,pc,event_type\n1,0,0,l2_read,64,1000\n".as_bytes())
                .unwrap();
        let mut records = Vec::new();
        let result =
            Encoder::new(&mut catalog, None, EncoderOptions::default()).encode(&mut trace, &mut records);
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_sorted_events() {
        let mut catalog = catalog();
        let options = EncoderOptions {
            sort_events: true,
            ..Default::default()
        };
        let records = encode_with(
            &mut catalog,
            None,
            options,
            "1,0,80000000,instruction,,vadd.vv v1,v2,v3\n",
        )
        .unwrap();
        let mut sorted = records[0].events.clone();
        sorted.sort();
        assert_eq!(records[0].events, sorted);
    }

    #[test]
    fn test_deterministic() {
        let body = "3,1,0,l1_miss,0,1000\n1,0,80000000,instruction,,vle32.v v1,(a0),v0.t\n\
                    3,0,0,stall,0,raw\n2,0,80000004,instruction,,vadd.vv v2,v1,v1\n";
        let mut first = catalog();
        let mut second = catalog();
        let a: Vec<_> = encode(&mut first, body).iter().map(|r| r.to_string()).collect();
        let b: Vec<_> = encode(&mut second, body).iter().map(|r| r.to_string()).collect();
        assert_eq!(a, b);
    }
}
