
//! Command-line interface definition for the sourbin application.
//!
//! This file defines the `Cli` struct using the `clap` crate to parse and validate command-line arguments.
//! It covers the input assembly, output directory, collaborator data directories, contig filters,
//! seed-search thresholds and k-mer binning parameters. Custom value parsers reject out-of-range
//! values at parse time. The CLI output is styled using the `anstyle` crate for improved readability.

use std::path::PathBuf;

use clap::Parser;

use crate::bin_parms::{BinParms, MAX_DNA_KMER, MIN_E_VALUE};
use crate::binning::BinningMethod;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(styles=get_styles())]
#[command(disable_help_subcommand = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Contig FASTA file from the assembler
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub in_file: PathBuf,

    /// Output directory
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    pub out_dir: PathBuf,

    /// Directory with the seed-protein alignment tables (seed_hits.tsv, ref_hits.tsv)
    #[arg(long, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub finder: PathBuf,

    /// Reference-genome library (genomes.tsv and one FASTA file per genome)
    #[arg(long, help_heading = "Inputs", value_parser = clap::value_parser!(PathBuf))]
    pub genomes: PathBuf,

    /// Erase the output directory before starting
    #[arg(long, help_heading = "Output", default_value_t = false)]
    pub clear: bool,

    /// Minimum contig length for the seed-protein search
    #[arg(long, help_heading = "Contig filters", default_value_t = 500)]
    pub len_filter: usize,

    /// Minimum contig coverage for the seed-protein search
    #[arg(long, help_heading = "Contig filters", default_value_t = 5.0, value_parser = validate_coverage)]
    pub covg_filter: f64,

    /// Minimum contig length for binning
    #[arg(long, help_heading = "Contig filters", default_value_t = 300)]
    pub bin_len_filter: usize,

    /// Minimum contig coverage for binning
    #[arg(long, help_heading = "Contig filters", default_value_t = 5.0, value_parser = validate_coverage)]
    pub bin_covg_filter: f64,

    /// Maximum run of ambiguous bases in a binning contig
    #[arg(long, help_heading = "Contig filters", default_value_t = 30)]
    pub x_limit: usize,

    /// Maximum e-value for seed-protein hits
    #[arg(long, help_heading = "Seed search", default_value_t = 1e-20, value_parser = validate_e_value)]
    pub max_e: f64,

    /// Maximum e-value for reference-genome hits
    #[arg(long, help_heading = "Seed search", default_value_t = 1e-10, value_parser = validate_e_value)]
    pub ref_max_e: f64,

    /// Minimum fraction of a seed protein that must align
    #[arg(long, help_heading = "Seed search", default_value_t = 0.5, value_parser = validate_fraction)]
    pub min_len: f64,

    /// Maximum gap between alignment hits that are merged
    #[arg(long, help_heading = "Seed search", default_value_t = 600)]
    pub max_gap: usize,

    /// Binning method
    #[arg(long, help_heading = "Binning", value_enum, default_value_t = BinningMethod::Standard)]
    pub recipe: BinningMethod,

    /// Length of protein k-mers
    #[arg(long, help_heading = "Binning", default_value_t = 8, value_parser = validate_kmer_length)]
    pub k_prot: usize,

    /// Length of DNA k-mers
    #[arg(long, help_heading = "Binning", default_value_t = 15, value_parser = validate_kmer_length)]
    pub k_dna: usize,

    /// Length of repeat-region DNA k-mers (0 disables the repeat-region pass)
    #[arg(long, help_heading = "Binning", default_value_t = 50, value_parser = validate_dang_len)]
    pub dang_len: usize,

    /// Minimum k-mer hit margin required to place a contig
    #[arg(long, help_heading = "Binning", default_value_t = 10, value_parser = validate_bin_strength)]
    pub bin_strength: u32,

    /// Suffix appended to species names when naming bins
    #[arg(long, help_heading = "Binning", default_value = "clonal population")]
    pub name_suffix: String,

    /// Report debugging messages
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Tuning parameters selected on the command line.
    pub fn bin_parms(&self) -> BinParms {
        BinParms {
            len_filter: self.len_filter,
            covg_filter: self.covg_filter,
            bin_len_filter: self.bin_len_filter,
            bin_covg_filter: self.bin_covg_filter,
            x_limit: self.x_limit,
            max_e: self.max_e,
            ref_max_e: self.ref_max_e,
            min_len: self.min_len,
            max_gap: self.max_gap,
            k_prot: self.k_prot,
            k_dna: self.k_dna,
            dang_len: self.dang_len,
            bin_strength: self.bin_strength,
            name_suffix: self.name_suffix.clone(),
            method: self.recipe,
        }
    }
}

fn validate_coverage(value: &str) -> Result<f64, String> {
    let coverage: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` isn't a valid coverage"))?;

    if !(coverage >= 0.0 && coverage.is_finite()) {
        return Err("Coverage must be a non-negative number".to_string());
    }

    Ok(coverage)
}

fn validate_e_value(value: &str) -> Result<f64, String> {
    let e_value: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` isn't a valid e-value"))?;

    if !(MIN_E_VALUE..=1.0).contains(&e_value) {
        return Err(format!("E-value must be in the range [{MIN_E_VALUE:e}, 1]"));
    }

    Ok(e_value)
}

fn validate_fraction(value: &str) -> Result<f64, String> {
    let fraction: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` isn't a valid fraction"))?;

    if !(0.0..=1.0).contains(&fraction) {
        return Err("Fraction must be in the range [0, 1]".to_string());
    }

    Ok(fraction)
}

fn validate_kmer_length(k: &str) -> Result<usize, String> {
    let k: usize = k
        .parse()
        .map_err(|_| format!("`{k}` isn't a valid k-mer length"))?;

    if !(1..=MAX_DNA_KMER).contains(&k) {
        return Err(format!("k-mer length must be in the range [1, {MAX_DNA_KMER}]"));
    }

    Ok(k)
}

fn validate_dang_len(k: &str) -> Result<usize, String> {
    let k: usize = k
        .parse()
        .map_err(|_| format!("`{k}` isn't a valid k-mer length"))?;

    if k > MAX_DNA_KMER {
        return Err(format!("Repeat-region k-mer length must be in the range [0, {MAX_DNA_KMER}]"));
    }

    Ok(k)
}

fn validate_bin_strength(value: &str) -> Result<u32, String> {
    let strength: u32 = value
        .parse()
        .map_err(|_| format!("`{value}` isn't a valid value"))?;

    if strength < 1 {
        return Err("Bin strength must be at least 1".to_string());
    }

    Ok(strength)
}

fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[test]
fn test_verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert()
}

#[test]
fn test_default_parms() {
    let cli = Cli::parse_from(["sourbin", "contigs.fasta", "out", "--finder", "f", "--genomes", "g"]);
    assert_eq!(cli.bin_parms(), BinParms::default());

    let cli = Cli::parse_from([
        "sourbin", "contigs.fasta", "out", "--finder", "f", "--genomes", "g", "--recipe", "strict", "--dang-len", "0",
    ]);
    assert_eq!(cli.bin_parms().method, BinningMethod::Strict);
    assert_eq!(cli.bin_parms().dang_len, 0);
}

#[test]
fn test_validators() {
    assert!(validate_coverage("-1").is_err());
    assert!(validate_e_value("1e-200").is_err());
    assert_eq!(validate_e_value("1e-20"), Ok(1e-20));
    assert!(validate_fraction("1.5").is_err());
    assert!(validate_kmer_length("0").is_err());
    assert!(validate_kmer_length("65").is_err());
    assert_eq!(validate_dang_len("0"), Ok(0));
    assert!(validate_bin_strength("0").is_err());
}
