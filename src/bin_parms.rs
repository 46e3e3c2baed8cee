
//! This module defines the `BinParms` struct, which holds the tuning parameters that
//! control contig filtering, the seed-protein search, and k-mer classification. It
//! provides the defaults used by the command line, fail-fast validation, and a compact
//! display form for logging.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binning::BinningMethod;
use crate::error::{BinError, Result};

/// Longest DNA k-mer supported by the 2-bit encoder.
pub const MAX_DNA_KMER: usize = 64;

/// Smallest e-value limit accepted for seed and reference-genome hits.
pub const MIN_E_VALUE: f64 = 1e-100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinParms {
    /// Minimum length for a seed-search contig.
    pub len_filter: usize,
    /// Minimum coverage for a seed-search contig.
    pub covg_filter: f64,
    /// Minimum length for a binning contig.
    pub bin_len_filter: usize,
    /// Minimum coverage for a binning contig.
    pub bin_covg_filter: f64,
    /// Maximum run of ambiguity characters in a binning contig.
    pub x_limit: usize,
    /// Maximum e-value for seed-protein hits.
    pub max_e: f64,
    /// Maximum e-value for reference-genome hits.
    pub ref_max_e: f64,
    /// Minimum fraction of a protein that must align.
    pub min_len: f64,
    /// Maximum gap between alignment hits that are merged.
    pub max_gap: usize,
    pub k_prot: usize,
    pub k_dna: usize,
    /// Repeat-region k-mer length; 0 disables the repeat pass.
    pub dang_len: usize,
    /// Minimum k-mer hit margin required to place a contig.
    pub bin_strength: u32,
    /// Suffix appended to species names when naming bins.
    pub name_suffix: String,
    pub method: BinningMethod,
}

impl Default for BinParms {
    fn default() -> Self {
        BinParms {
            len_filter: 500,
            covg_filter: 5.0,
            bin_len_filter: 300,
            bin_covg_filter: 5.0,
            x_limit: 30,
            max_e: 1e-20,
            ref_max_e: 1e-10,
            min_len: 0.5,
            max_gap: 600,
            k_prot: 8,
            k_dna: 15,
            dang_len: 50,
            bin_strength: 10,
            name_suffix: "clonal population".to_string(),
            method: BinningMethod::Standard,
        }
    }
}

impl BinParms {
    /// Verify all parameters are within their legal ranges.
    pub fn validate(&self) -> Result<()> {
        if self.covg_filter < 0.0 || self.covg_filter.is_nan() {
            return Err(BinError::Config("Seed-search coverage filter cannot be negative.".into()));
        }
        if self.bin_covg_filter < 0.0 || self.bin_covg_filter.is_nan() {
            return Err(BinError::Config("Binning coverage filter cannot be negative.".into()));
        }
        if !(0.0..=1.0).contains(&self.min_len) {
            return Err(BinError::Config(
                "Minimum length match fraction must be between 0 and 1.".into(),
            ));
        }
        if self.max_e.is_nan() || self.max_e < MIN_E_VALUE {
            return Err(BinError::Config(format!(
                "Seed-search e-value limit is too low. Minimum is {MIN_E_VALUE:e}."
            )));
        }
        if self.ref_max_e.is_nan() || self.ref_max_e < MIN_E_VALUE {
            return Err(BinError::Config(format!(
                "Reference-genome e-value limit is too low. Minimum is {MIN_E_VALUE:e}."
            )));
        }
        if self.k_prot == 0 {
            return Err(BinError::Config("Protein k-mer length must be greater than 0.".into()));
        }
        if !(1..=MAX_DNA_KMER).contains(&self.k_dna) {
            return Err(BinError::Config(format!(
                "DNA k-mer length must be in the range [1, {MAX_DNA_KMER}]."
            )));
        }
        if self.dang_len > MAX_DNA_KMER {
            return Err(BinError::Config(format!(
                "Repeat-region k-mer length cannot exceed {MAX_DNA_KMER}."
            )));
        }
        if self.bin_strength < 1 {
            return Err(BinError::Config("Bin strength cannot be less than 1.".into()));
        }
        if !self.name_suffix.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(BinError::Config(
                "Name suffix can only contain printable characters.".into(),
            ));
        }

        Ok(())
    }

    /// Display name for a bin built from a reference genome.
    pub fn bin_name(&self, genome_name: &str) -> String {
        let suffix = self.name_suffix.trim();
        if suffix.is_empty() {
            genome_name.to_string()
        } else {
            format!("{genome_name} {suffix}")
        }
    }
}

impl fmt::Display for BinParms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "--len-filter={} --covg-filter={} --bin-len-filter={} --bin-covg-filter={} --x-limit={} \
             --max-e={:e} --ref-max-e={:e} --min-len={} --max-gap={} --k-prot={} --k-dna={} \
             --dang-len={} --bin-strength={} --recipe={}",
            self.len_filter,
            self.covg_filter,
            self.bin_len_filter,
            self.bin_covg_filter,
            self.x_limit,
            self.max_e,
            self.ref_max_e,
            self.min_len,
            self.max_gap,
            self.k_prot,
            self.k_dna,
            self.dang_len,
            self.bin_strength,
            self.method,
        )
    }
}
