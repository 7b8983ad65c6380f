use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::{LevelFilter, info};
use rayon::prelude::*;

use trace2prv::catalog::{Catalog, DEFAULT_NAMESPACE};
use trace2prv::convert::{Settings, check_output_names, convert_file};
use trace2prv::encoder::EncoderOptions;
use trace2prv::error::Result;
use trace2prv::state::Timestamp;
use trace2prv::symbols::SymbolTable;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(required = true, help = "input simulator trace filenames (.csv or .csv.gz)")]
    filenames: Vec<PathBuf>,

    #[arg(long = "output-dir", default_value = ".", help = "output directory pathname")]
    output_dir: PathBuf,

    #[arg(
        long = "output-name",
        help = "base name of the generated files (single input only)"
    )]
    output_name: Option<OsString>,

    #[arg(long = "events-sorted", help = "sort events by id within each record")]
    events_sorted: bool,

    #[arg(
        long = "time-between-instruction",
        default_value_t = 1,
        help = "simulated nanoseconds between two instructions"
    )]
    time_between_instruction: u64,

    #[arg(
        long = "offset-events-with-delay",
        help = "spread element offsets over the following nanoseconds instead of one record"
    )]
    offset_events_with_delay: bool,

    #[arg(long, help = "simulated executable, used to name memory objects")]
    binary: Option<PathBuf>,

    #[arg(long, default_value = "nm", help = "symbol listing tool run on --binary")]
    nm: String,

    #[arg(long, help = "event catalog JSON file (defaults to the built-in one)")]
    events: Option<PathBuf>,

    #[arg(long = "trace-type", default_value = "coyote", help = "catalog entry to use")]
    trace_type: String,

    #[arg(long, help = "gzip the generated .prv file")]
    compress: bool,

    #[arg(long, help = "trace duration in nanoseconds written to the header")]
    duration: Option<u64>,

    #[arg(long, help = "print canonical records as JSON lines instead of writing files")]
    dump: bool,

    #[arg(short, long, help = "print statistics")]
    statistics: bool,

    #[arg(short, long, action = ArgAction::Count, help = "print more diagnostics (repeatable)")]
    verbose: u8,
}

fn initialize_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::builder()
        .format_timestamp(None)
        .format_level(true)
        .format_target(false)
        .filter_level(level)
        .init();
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    let mut catalog = match &cli.events {
        Some(path) => {
            println!("Reading event catalog {:?}...", path);
            Catalog::load(&fs::read_to_string(path)?, &cli.trace_type)?
        }
        None => Catalog::builtin(&cli.trace_type)?,
    };
    catalog.standardize_ids(DEFAULT_NAMESPACE)?;
    Ok(catalog)
}

fn run(cli: Cli) -> Result<()> {
    let catalog = load_catalog(&cli)?;
    let symbols = match &cli.binary {
        Some(binary) => Some(SymbolTable::from_binary(&cli.nm, binary)?),
        None => None,
    };
    if let Some(symbols) = &symbols {
        info!("{} memory objects", symbols.len());
    }

    let settings = Settings {
        output_dir: cli.output_dir,
        output_name: cli.output_name,
        options: EncoderOptions {
            sort_events: cli.events_sorted,
            offsets_with_delay: cli.offset_events_with_delay,
            time_between_instructions: cli.time_between_instruction,
        },
        compress: cli.compress,
        duration: cli.duration.map(Timestamp),
        dump: cli.dump,
        statistics: cli.statistics,
    };
    check_output_names(&cli.filenames, &settings)?;

    let summaries = cli
        .filenames
        .par_iter()
        .map(|filename| convert_file(filename, &catalog, symbols.as_ref(), &settings))
        .collect::<Result<Vec<_>>>()?;

    for summary in &summaries {
        info!(
            "{} rows, {} records on {} threads ({} dropped, {} skipped)",
            summary.stats.rows,
            summary.stats.records,
            summary.threads,
            summary.dropped,
            summary.stats.skipped
        );
    }
    if !settings.dump {
        println!("PRV generated successfully!");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
