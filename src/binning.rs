
//! Assignment of unplaced contigs to starter bins.
//!
//! A `BinningMethod` selected on the command line creates a `BinningEngine`. The k-mer
//! engine runs two passes over the contig file:
//!
//! 1. The reference genomes of every starter bin are loaded into a discriminating k-mer
//!    database under the starter bin's ID. Each unplaced contig is scored against the
//!    database and merged into the winning bin when the hit margin is large enough.
//! 2. Optionally, long DNA k-mers from the contigs already placed are used to rescue
//!    unplaced contigs that share repeat regions or mobile elements with a bin. The
//!    best-scoring bin is accepted without a margin test.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{info, warn};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::bin_group::BinGroup;
use crate::bin_parms::BinParms;
use crate::collaborators::GenomeSource;
use crate::contigs::scan_contigs;
use crate::error::BinError;
use crate::kmer_db::{DiscriminatingKmerDb, DnaKmerDb, HitCounts, ProteinKmerDb};
use crate::progress::{contig_spinner, progress_bar};

/// Available contig-assignment strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BinningMethod {
    /// Protein k-mers from six-frame translations.
    #[default]
    Standard,
    /// DNA k-mers.
    Strict,
    /// No assignment; only the starter bins are reported.
    Report,
}

impl BinningMethod {
    /// Create the engine implementing this method.
    pub fn create(self, parms: &BinParms) -> Box<dyn BinningEngine> {
        match self {
            BinningMethod::Standard => {
                Box::new(KmerBinningEngine::new(Box::new(ProteinKmerDb::new(parms.k_prot)), parms))
            }
            BinningMethod::Strict => {
                Box::new(KmerBinningEngine::new(Box::new(DnaKmerDb::new(parms.k_dna)), parms))
            }
            BinningMethod::Report => Box::new(NullBinningEngine),
        }
    }
}

impl fmt::Display for BinningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinningMethod::Standard => "standard",
            BinningMethod::Strict => "strict",
            BinningMethod::Report => "report",
        };
        write!(f, "{name}")
    }
}

pub trait BinningEngine {
    /// Merge unplaced contigs of `group` into the starter bins.
    ///
    /// `in_file` is the original contig file, streamed once per pass.
    fn classify(
        &mut self,
        starters: &[String],
        group: &mut BinGroup,
        in_file: &Path,
        genomes: &mut dyn GenomeSource,
    ) -> Result<()>;
}

/// Outcome of scoring a contig against the starter bins.
#[derive(Clone, Debug, PartialEq)]
pub enum Placement {
    NoHits,
    /// Single candidate with too few hits.
    UnambiguousWeak,
    UnambiguousStrong(String),
    /// Several candidates whose best margin is too small.
    AmbiguousWeak,
    AmbiguousStrong(String),
}

impl Placement {
    pub fn target(&self) -> Option<&str> {
        match self {
            Placement::UnambiguousStrong(id) | Placement::AmbiguousStrong(id) => Some(id),
            _ => None,
        }
    }

    fn counter(&self) -> &'static str {
        match self {
            Placement::NoHits => "kmer-contig-no-hits",
            Placement::UnambiguousWeak => "kmer-contig-unambiguous-weak",
            Placement::UnambiguousStrong(_) => "kmer-contig-unambiguous-strong",
            Placement::AmbiguousWeak => "kmer-contig-ambiguous-weak",
            Placement::AmbiguousStrong(_) => "kmer-contig-ambiguous-strong",
        }
    }
}

/// Choose the bin for a contig from its k-mer hits.
///
/// A single candidate needs at least `min_strength` hits. With several candidates the best
/// must lead the runner-up by at least `min_strength`.
pub fn choose_bin(hits: &HitCounts, min_strength: u32) -> Placement {
    match hits.sorted() {
        [] => Placement::NoHits,
        [(id, count)] => {
            if *count >= min_strength {
                Placement::UnambiguousStrong(id.clone())
            } else {
                Placement::UnambiguousWeak
            }
        }
        [(id, best), (_, second), ..] => {
            if best - second >= min_strength {
                Placement::AmbiguousStrong(id.clone())
            } else {
                Placement::AmbiguousWeak
            }
        }
    }
}

/// Engine that leaves the starter bins as they are.
pub struct NullBinningEngine;

impl BinningEngine for NullBinningEngine {
    fn classify(
        &mut self,
        starters: &[String],
        _group: &mut BinGroup,
        _in_file: &Path,
        _genomes: &mut dyn GenomeSource,
    ) -> Result<()> {
        info!("Contig assignment skipped; {} starter bins will be reported as is.", starters.len());
        Ok(())
    }
}

/// Discriminating k-mer engine.
pub struct KmerBinningEngine {
    kmer_db: Box<dyn DiscriminatingKmerDb>,
    bin_strength: u32,
    dang_len: usize,
}

impl KmerBinningEngine {
    pub fn new(kmer_db: Box<dyn DiscriminatingKmerDb>, parms: &BinParms) -> Self {
        KmerBinningEngine {
            kmer_db,
            bin_strength: parms.bin_strength,
            dang_len: parms.dang_len,
        }
    }

    /// Build the database from the reference genomes of the starter bins.
    fn load_ref_genomes(
        &mut self,
        starters: &[String],
        group: &BinGroup,
        genomes: &mut dyn GenomeSource,
    ) -> Result<()> {
        let mut refs = Vec::new();
        for id in starters {
            let bin = group
                .bin(id)
                .with_context(|| format!("Starter bin {id} is not in the bin group."))?;
            refs.extend(bin.ref_genomes().iter().map(|genome_id| (id.as_str(), genome_id.as_str())));
        }

        info!("Loading {} reference genomes for {} starter bins.", refs.len(), starters.len());
        let progress_bar = progress_bar(refs.len() as u64);
        for (bin_id, genome_id) in refs {
            let genome = genomes.get_genome(genome_id).map_err(|e| {
                BinError::Collaborator(format!("failed to fetch reference genome {genome_id}: {e:#}"))
            })?;
            progress_bar.set_message(genome.name.clone());
            for contig in &genome.contigs {
                self.kmer_db.add_sequence(bin_id, contig.seq.as_bytes())?;
            }
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        self.kmer_db.finalize();
        info!(
            "Discriminating k-mer database holds {} k-mers.",
            self.kmer_db.kmer_count().to_formatted_string(&Locale::en)
        );
        Ok(())
    }

    /// First pass: place contigs using reference-genome k-mers.
    fn process_ref_genomes(
        &mut self,
        starters: &[String],
        group: &mut BinGroup,
        in_file: &Path,
        genomes: &mut dyn GenomeSource,
    ) -> Result<()> {
        self.load_ref_genomes(starters, group, genomes)?;

        info!("Scanning contigs in {}.", in_file.display());
        let spinner = contig_spinner("scanned for reference k-mers");
        let kmer_db = &self.kmer_db;
        let min_strength = self.bin_strength;
        let mut place_count = 0u64;
        let contig_count = scan_contigs(in_file, |contig| {
            spinner.inc(1);
            let Some(bin) = group.contig_bin(&contig.label) else {
                group.count("kmer-contig-skip");
                return Ok(());
            };
            if bin.is_significant() {
                return Ok(());
            }
            let source_id = bin.id().to_string();

            let placement = choose_bin(&kmer_db.count_hits(&contig.seq), min_strength);
            group.count(placement.counter());
            if let Some(target_id) = placement.target() {
                group.merge(target_id, &source_id)?;
                group.count("kmer-contig-placed");
                place_count += 1;
            }
            Ok(())
        })?;
        spinner.finish_and_clear();

        info!(
            "{} contigs read and {} placed by discriminating-kmer analysis.",
            contig_count.to_formatted_string(&Locale::en),
            place_count.to_formatted_string(&Locale::en)
        );

        self.kmer_db.clear();
        Ok(())
    }

    /// Second pass: place contigs sharing long k-mers with contigs already in a bin.
    fn process_repeat_regions(&self, group: &mut BinGroup, in_file: &Path) -> Result<()> {
        let mut dang_kmers = DnaKmerDb::new(self.dang_len);

        info!("Scanning {} for repeat-region k-mers.", in_file.display());
        let spinner = contig_spinner("scanned for repeat-region k-mers");
        let mut scan_count = 0u64;
        scan_contigs(in_file, |contig| {
            spinner.inc(1);
            if let Some(bin) = group.contig_bin(&contig.label).filter(|bin| bin.is_significant()) {
                dang_kmers.add_sequence(bin.id(), &contig.seq)?;
                scan_count += 1;
            }
            Ok(())
        })?;
        spinner.finish_and_clear();
        dang_kmers.finalize();
        info!("{} placed contigs scanned for repeat-region k-mers.", scan_count);

        info!("Scanning {} for repeat-region placement.", in_file.display());
        let spinner = contig_spinner("checked for repeat regions");
        let mut place_count = 0u64;
        scan_contigs(in_file, |contig| {
            spinner.inc(1);
            let Some(bin) = group.contig_bin(&contig.label).filter(|bin| !bin.is_significant()) else {
                return Ok(());
            };
            let source_id = bin.id().to_string();

            match dang_kmers.count_hits(&contig.seq).best() {
                Some((target_id, _)) => {
                    group.merge(target_id, &source_id)?;
                    group.count("repeat-contig-placed");
                    place_count += 1;
                }
                None => group.count("repeat-contig-no-hits"),
            }
            Ok(())
        })?;
        spinner.finish_and_clear();
        info!("{} contigs placed during the repeat-region pass.", place_count);

        Ok(())
    }
}

impl BinningEngine for KmerBinningEngine {
    fn classify(
        &mut self,
        starters: &[String],
        group: &mut BinGroup,
        in_file: &Path,
        genomes: &mut dyn GenomeSource,
    ) -> Result<()> {
        if starters.is_empty() {
            warn!("No starter bins available; no contigs will be assigned.");
            return Ok(());
        }

        self.process_ref_genomes(starters, group, in_file, genomes)?;
        if self.dang_len > 0 {
            self.process_repeat_regions(group, in_file)?;
        }
        Ok(())
    }
}
