use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flate2::{Compression, write::GzEncoder};
use log::info;

use crate::backend::{analyze, dump, paraver};
use crate::catalog::Catalog;
use crate::encoder::{EncodeStats, Encoder, EncoderOptions};
use crate::error::{Error, Result};
use crate::state::{CanonicalRecord, Timestamp};
use crate::symbols::SymbolTable;
use crate::trace::read_trace;

#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub output_name: Option<OsString>,
    pub options: EncoderOptions,
    pub compress: bool,
    pub duration: Option<Timestamp>,
    pub dump: bool,
    pub statistics: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_dir: PathBuf::from("."),
            output_name: None,
            options: EncoderOptions::default(),
            compress: false,
            duration: None,
            dump: false,
            statistics: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub prv: Option<PathBuf>,
    pub threads: usize,
    pub dropped: usize,
    pub stats: EncodeStats,
    pub preprocessing: Duration,
    pub processing: Duration,
}

/// File stem of `name`, or of `input` when no name is given, with a
/// trailing `.gz` removed first.
pub fn output_base(input: &Path, name: Option<&OsStr>) -> OsString {
    let source = name.map_or(input, Path::new);
    let mut file = PathBuf::from(source.file_name().unwrap_or(source.as_os_str()));
    if file.extension() == Some(OsStr::new("gz")) {
        file.set_extension("");
    }
    file.file_stem()
        .map_or_else(|| file.as_os_str().to_owned(), OsStr::to_owned)
}

/// Fails when two inputs would write the same output files. Inputs are
/// converted concurrently, so a shared base name would interleave writes.
pub fn check_output_names(inputs: &[PathBuf], settings: &Settings) -> Result<()> {
    if settings.dump {
        return Ok(());
    }
    if settings.output_name.is_some() && inputs.len() > 1 {
        return Err(Error::Config(
            "--output-name can only be used with a single input".to_owned(),
        ));
    }
    let mut seen = BTreeMap::new();
    for input in inputs {
        let base = output_base(input, settings.output_name.as_deref());
        if let Some(previous) = seen.insert(base.clone(), input) {
            return Err(Error::Config(format!(
                "{:?} and {:?} would both write {:?} in {:?}",
                previous, input, base, settings.output_dir
            )));
        }
    }
    Ok(())
}

fn output_path(dir: &Path, base: &OsStr, suffix: &str) -> PathBuf {
    let mut file = base.to_owned();
    file.push(suffix);
    dir.join(file)
}

fn write_prv<W: Write>(
    out: &mut W,
    duration: Timestamp,
    threads: usize,
    records: &[CanonicalRecord],
) -> io::Result<()> {
    paraver::write_header(out, &paraver::trace_date(), duration, threads)?;
    paraver::write_records(out, records)
}

fn emit_files(
    base: &OsStr,
    settings: &Settings,
    catalog: &Catalog,
    threads: usize,
    duration: Timestamp,
    records: &[CanonicalRecord],
) -> io::Result<PathBuf> {
    fs::create_dir_all(&settings.output_dir)?;

    let suffix = if settings.compress { ".prv.gz" } else { ".prv" };
    let prv = output_path(&settings.output_dir, base, suffix);
    println!("Generating trace {:?}", prv);
    let file = BufWriter::new(File::create(&prv)?);
    if settings.compress {
        let mut gz = GzEncoder::new(file, Compression::default());
        write_prv(&mut gz, duration, threads, records)?;
        gz.finish()?.flush()?;
    } else {
        let mut file = file;
        write_prv(&mut file, duration, threads, records)?;
        file.flush()?;
    }

    let row = output_path(&settings.output_dir, base, ".row");
    let mut file = BufWriter::new(File::create(&row)?);
    paraver::write_row(&mut file, threads, catalog.trace_type())?;
    file.flush()?;

    let pcf = output_path(&settings.output_dir, base, ".pcf");
    let mut file = BufWriter::new(File::create(&pcf)?);
    paraver::write_pcf(&mut file, catalog)?;
    file.flush()?;

    Ok(prv)
}

/// Runs the whole pipeline for one trace file. Every file gets its own copy
/// of `catalog`, so value labels never leak between traces.
pub fn convert_file(
    input: &Path,
    catalog: &Catalog,
    symbols: Option<&SymbolTable>,
    settings: &Settings,
) -> Result<Summary> {
    // stdout carries the records themselves when dumping
    let progress = !settings.dump;
    let start = Instant::now();
    if progress {
        println!("Reading trace file {:?}...", input);
    }
    let mut trace = read_trace(input)?;
    let dropped = trace.dropped;
    let preprocessing = start.elapsed();
    info!("read {} rows from {:?}", trace.rows.len(), input);

    let start = Instant::now();
    let mut catalog = catalog.clone();
    let mut records = Vec::new();
    let mut encoder = Encoder::new(&mut catalog, symbols, settings.options);
    let stats = encoder.encode(&mut trace, &mut records)?;
    let threads = encoder.thread_count();

    let prv = if settings.dump {
        dump::dump_records(&mut io::stdout().lock(), &records).map_err(io::Error::from)?;
        None
    } else {
        let base = output_base(input, settings.output_name.as_deref());
        let duration = settings
            .duration
            .or(stats.last_time)
            .unwrap_or_default();
        Some(emit_files(&base, settings, &catalog, threads, duration, &records)?)
    };
    if settings.statistics {
        analyze::print_statistics(&catalog, &records);
    }
    let processing = start.elapsed();

    if progress {
        println!("Preprocessing time: {:.3} s", preprocessing.as_secs_f64());
        println!("Processing time: {:.3} s", processing.as_secs_f64());
    }
    Ok(Summary {
        prv,
        threads,
        dropped,
        stats,
        preprocessing,
        processing,
    })
}
