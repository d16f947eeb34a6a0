//! SWIFT Pipeline CLI
//!
//! Reads a bank directory and a batch of payment messages from CSV, runs them
//! through the pipeline and writes one result row per message to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- banks.csv messages.csv [config.json] > results.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug`, `info` or `warn` to control logging verbosity

use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::process;
use std::sync::Arc;
use swift_pipeline::{
    read_messages, write_results, AmountHistory, BankDirectory, CsvSink, HeuristicReviewer,
    NullSink, Pipeline, PipelineConfig, PipelineError, RecordSink, Result,
};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return Err(PipelineError::MissingArgument);
    }

    let config = match args.get(3) {
        Some(path) => PipelineConfig::from_file(Path::new(path))?,
        None => PipelineConfig::default(),
    };

    let directory = BankDirectory::from_csv(BufReader::new(File::open(&args[1])?))?;
    let messages = read_messages(BufReader::new(File::open(&args[2])?))?;

    // Earlier runs' records seed the amount history before the sink appends to them
    let capacity = config.fraud.history_capacity;
    let history = match &config.records_dir {
        Some(dir) => AmountHistory::from_records(dir, &directory, capacity)?,
        None => AmountHistory::new(capacity),
    };
    let sink: Box<dyn RecordSink> = match &config.records_dir {
        Some(dir) => Box::new(CsvSink::open(dir)?),
        None => Box::new(NullSink),
    };

    let mut pipeline = Pipeline::new(
        config,
        directory,
        history,
        Arc::new(HeuristicReviewer::default()),
        sink,
    )?;
    let results = pipeline.run(messages)?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    write_results(&results, handle)?;

    Ok(())
}
