use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use nom::{
    IResult,
    character::complete::{char, i64 as signed, u8 as byte, u32 as unsigned, u64 as wide},
    combinator::{all_consuming, map_res},
    multi::many0,
    sequence::{pair, preceded},
};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::state::{CanonicalRecord, EventID, RecordType, ThreadID, Timestamp};

// Make sure this is up to date with the state table Paraver expects
const PCF_PREAMBLE: &str = "DEFAULT_OPTIONS

LEVEL               THREAD
UNITS               NANOSEC
LOOK_BACK           100
SPEED               1
FLAG_ICONS          ENABLED
NUM_OF_STATE_COLORS 1000
YMAX_SCALE          37


DEFAULT_SEMANTIC

THREAD_FUNC          State As Is


STATES
0    Idle
1    Running
2    Not created
3    Waiting a message
4    Blocking Send
5    Synchronization
6    Test/Probe
7    Scheduling and Fork/Join
8    Wait/WaitAll
9    Blocked
10    Immediate Send
11    Immediate Receive
12    I/O
13    Group Communication
14    Tracing Disabled
15    Others
16    Send Receive
17    Memory transfer
18    Profiling
19    On-line analysis
20    Remote memory access
21    Atomic memory operation
22    Memory ordering operation
23    Distributed locking
24    Overhead
25    One-sided op
26    Startup latency
27    Waiting links
28    Data copy
29    RTT
30    Allocating memory
31    Freeing memory


STATES_COLOR
0    {117,195,255}
1    {0,0,255}
2    {255,255,255}
3    {255,0,0}
4    {255,0,174}
5    {179,0,0}
6    {0,255,0}
7    {255,255,0}
8    {235,0,0}
9    {0,162,0}
10    {255,0,255}
11    {100,100,177}
12    {172,174,41}
13    {255,144,26}
14    {2,255,177}
15    {192,224,0}
16    {66,66,66}
17    {255,0,96}
18    {169,169,169}
19    {169,0,0}
20    {0,109,255}
21    {200,61,68}
22    {200,66,0}
23    {0,41,0}
24    {139,121,177}
25    {116,116,116}
26    {200,50,89}
27    {255,171,98}
28    {0,68,189}
29    {52,43,0}
30    {255,46,0}
31    {100,216,32}


";

/// Gregorian date of a day count relative to 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// `dd/mm/yyyy at HH:MM` in UTC.
pub fn format_date(epoch_seconds: u64) -> String {
    let seconds = epoch_seconds as i64;
    let (year, month, day) = civil_from_days(seconds.div_euclid(86400));
    let minutes = seconds.rem_euclid(86400) / 60;
    format!(
        "{:02}/{:02}/{:04} at {:02}:{:02}",
        day,
        month,
        year,
        minutes / 60,
        minutes % 60
    )
}

/// Honors `SOURCE_DATE_EPOCH` so that repeated conversions are identical.
pub fn trace_date() -> String {
    let seconds = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs())
        });
    format_date(seconds)
}

pub fn write_header<W: Write>(
    out: &mut W,
    date: &str,
    duration: Timestamp,
    threads: usize,
) -> io::Result<()> {
    writeln!(
        out,
        "#Paraver ({}):{}_ns:1({}):1:1:({}:1)",
        date, duration, threads, threads
    )
}

pub fn write_records<W: Write>(out: &mut W, records: &[CanonicalRecord]) -> io::Result<()> {
    for record in records {
        writeln!(out, "{}", record)?;
    }
    Ok(())
}

pub fn write_row<W: Write>(out: &mut W, threads: usize, label: &str) -> io::Result<()> {
    writeln!(out, "LEVEL CPU SIZE {}", threads)?;
    for cpu in 1..=threads {
        writeln!(out, "{:02}.{}", cpu, label)?;
    }
    writeln!(out)?;

    writeln!(out, "LEVEL TASK SIZE 1")?;
    writeln!(out, "{}", label)?;
    writeln!(out)?;

    writeln!(out, "LEVEL NODE SIZE 1")?;
    writeln!(out, "{}", label)?;
    writeln!(out)?;

    writeln!(out, "LEVEL THREAD SIZE {}", threads)?;
    for _ in 0..threads {
        writeln!(out, "{}", label)?;
    }
    Ok(())
}

pub fn write_pcf<W: Write>(out: &mut W, catalog: &Catalog) -> io::Result<()> {
    out.write_all(PCF_PREAMBLE.as_bytes())?;
    for idx in catalog.walk() {
        let event = catalog.event(idx);
        write!(out, "\nEVENT_TYPE\n9   {}     {}\n", event.id, event.name)?;
        if !event.values.is_empty() {
            writeln!(out, "VALUES")?;
            for (value, label) in event.values.iter() {
                writeln!(out, "{} {}", value, label)?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn record_line(input: &str) -> IResult<&str, CanonicalRecord> {
    let (input, kind) = map_res(byte, |v: u8| RecordType::try_from(v))(input)?;
    let (input, _cpu) = preceded(char(':'), unsigned)(input)?;
    let (input, _appl) = preceded(char(':'), unsigned)(input)?;
    let (input, _task) = preceded(char(':'), unsigned)(input)?;
    let (input, thread) = preceded(char(':'), unsigned)(input)?;
    let (input, time) = preceded(char(':'), wide)(input)?;
    let (input, events) = many0(pair(
        preceded(char(':'), wide),
        preceded(char(':'), signed),
    ))(input)?;
    Ok((
        input,
        CanonicalRecord {
            kind,
            time: Timestamp(time),
            thread: ThreadID(thread),
            events: events
                .into_iter()
                .map(|(id, value)| (EventID(id), value))
                .collect(),
        },
    ))
}

/// Reads one record line back.
pub fn parse_record_line(line: &str) -> Result<CanonicalRecord> {
    let (_, record) = all_consuming(record_line)(line.trim_end())?;
    Ok(record)
}
