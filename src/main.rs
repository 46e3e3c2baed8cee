
//! Main entry point for the sourbin application.
//!
//! This file handles command-line parsing, logging setup, parameter validation, and orchestrates
//! the checkpointed binning pipeline. Contigs are loaded and filtered, starter bins are built from
//! seed-protein hits, remaining contigs are assigned with discriminating k-mers, and the bins are
//! written to the output directory.

use std::env;
use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::cli::Cli;
use crate::collaborators::{DirectoryGenomeSource, GenomeCache, TableSeedFinder, GENOME_CACHE_DIR};
use crate::logging::setup_logger;
use crate::pipeline::Pipeline;

mod cli;
pub mod logging;
pub mod progress;
pub mod error;
pub mod hashing;
pub mod translation;
pub mod contigs;
pub mod bin;
pub mod bin_group;
pub mod bin_parms;
pub mod kmer_db;
pub mod binning;
pub mod collaborators;
pub mod seed_search;
pub mod pipeline;

/// Common initialization required by all commands.
fn init() {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    info!("{} v{}", env!("CARGO_PKG_NAME"), VERSION);
    info!("{}", env::args().collect::<Vec<String>>().join(" "));
}

fn main() -> Result<()> {
    let start = Instant::now();

    let args = Cli::parse();

    // the log file lives in the output directory, so clear it first
    if args.clear && args.out_dir.is_dir() {
        fs::remove_dir_all(&args.out_dir)
            .with_context(|| format!("Failed to erase output directory {}", args.out_dir.display()))?;
    }
    fs::create_dir_all(&args.out_dir)?;

    setup_logger(&args.out_dir, args.verbose)?;

    init();
    if args.clear {
        info!("Output directory {} cleared.", args.out_dir.display());
    }

    let parms = args.bin_parms();
    parms.validate()?;
    info!("Parameters: {}", parms);

    if !args.in_file.is_file() {
        return Err(anyhow::anyhow!("Input file {} does not exist.", args.in_file.display()));
    }

    let finder = TableSeedFinder::new(&args.finder, &parms)?;
    let genomes = GenomeCache::new(
        DirectoryGenomeSource::new(&args.genomes)?,
        &args.out_dir.join(GENOME_CACHE_DIR),
    )?;
    let engine = parms.method.create(&parms);

    let mut pipeline = Pipeline::new(
        &args.in_file,
        &args.out_dir,
        parms,
        Box::new(finder),
        Box::new(genomes),
        engine,
    );
    let group = pipeline.run()?;
    info!(
        "{} significant bins found in {} contigs.",
        group.significant_bins().len(),
        group.contig_count()
    );

    info!("Elapsed time (sec): {:.2}", start.elapsed().as_secs_f32());
    info!("Done.");

    Ok(())
}
