use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, info, warn};

use crate::catalog::Category;
use crate::error::{Error, Result};
use crate::state::{CoreID, Timestamp};

// Make sure this is up to date with the simulator's logger header:
//   timestamp,core,pc,event_type,id,address
pub mod column {
    pub const TIME: usize = 0;
    pub const CORE: usize = 1;
    pub const PC: usize = 2;
    pub const KIND: usize = 3;
    pub const DETAIL: usize = 4;
    pub const PAYLOAD: usize = 5;

    pub fn name(column: usize) -> &'static str {
        match column {
            TIME => "timestamp",
            CORE => "core",
            PC => "pc",
            KIND => "event_type",
            DETAIL => "id",
            PAYLOAD => "address",
            _ => "extra",
        }
    }
}

/// Columns a category reads from each row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RowSchema {
    pub category: Category,
    pub columns: &'static [usize],
}

impl RowSchema {
    pub fn width(&self) -> usize {
        self.columns.iter().max().map_or(0, |c| c + 1)
    }

    pub fn check_header(&self, header_width: usize) -> Result<()> {
        if header_width < self.width() {
            let missing: Vec<_> = self
                .columns
                .iter()
                .filter(|c| **c >= header_width)
                .map(|c| column::name(*c))
                .collect();
            return Err(Error::Schema(format!(
                "rows of category {:?} need columns {} but the header has only {} columns",
                self.category,
                missing.join(", "),
                header_width
            )));
        }
        Ok(())
    }

    pub fn fits(&self, row: &TraceRow) -> bool {
        row.len() >= self.width()
    }
}

impl Category {
    pub fn schema(self) -> RowSchema {
        use column::*;
        let columns: &'static [usize] = match self {
            Category::Instruction => &[TIME, CORE, PC, KIND, DETAIL, PAYLOAD],
            Category::Cache | Category::Stall | Category::Counter => {
                &[TIME, CORE, KIND, PAYLOAD]
            }
            Category::Request | Category::Bank => &[TIME, CORE, KIND, DETAIL, PAYLOAD],
        };
        RowSchema {
            category: self,
            columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRow {
    pub time: Timestamp,
    pub core: CoreID,
    fields: Vec<String>,
}

impl TraceRow {
    /// Returns `None` for malformed rows: empty, a first field that is not
    /// a nonnegative integer, or too few columns to carry a kind.
    pub fn parse(record: &csv::StringRecord) -> Option<TraceRow> {
        let first = record.get(column::TIME)?;
        if !first.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            return None;
        }
        let time = first.parse::<u64>().ok()?;
        let core = record.get(column::CORE)?.parse::<u64>().ok()?;
        record.get(column::KIND).filter(|kind| !kind.is_empty())?;
        Some(TraceRow {
            time: Timestamp(time),
            core: CoreID(core),
            fields: record.iter().map(String::from).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn kind(&self) -> &str {
        &self.fields[column::KIND]
    }

    pub fn field(&self, column: usize) -> &str {
        self.fields.get(column).map_or("", String::as_str)
    }

    /// Disassembly may contain commas, so instruction rows glue every
    /// trailing field back together.
    pub fn payload(&self, category: Category) -> String {
        match category {
            Category::Instruction => self
                .fields
                .get(column::PAYLOAD..)
                .map_or_else(String::new, |rest| rest.join(",")),
            _ => self.field(column::PAYLOAD).to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub header: Vec<String>,
    pub rows: Vec<TraceRow>,
    pub dropped: usize,
}

impl Trace {
    /// Stable ascending sort by timestamp.
    pub fn sort(&mut self) {
        self.rows.sort_by_key(|row| row.time);
    }
}

pub fn read_trace_from<R: Read>(reader: R) -> Result<Trace> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut trace = Trace {
        header: reader.headers()?.iter().map(String::from).collect(),
        ..Default::default()
    };
    info!("Trace header: {}", trace.header.join(","));

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        match TraceRow::parse(&record) {
            Some(row) => trace.rows.push(row),
            None => {
                // header occupies the first line
                debug!("dropping malformed row {}: {:?}", line + 2, record);
                trace.dropped += 1;
            }
        }
    }
    if trace.dropped > 0 {
        warn!("dropped {} malformed rows", trace.dropped);
    }
    Ok(trace)
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Trace> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    if path.extension() == Some(OsStr::new("gz")) {
        read_trace_from(GzDecoder::new(file))
    } else {
        read_trace_from(file)
    }
}
