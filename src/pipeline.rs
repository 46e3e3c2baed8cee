
//! Checkpointed binning pipeline.
//!
//! The pipeline is an ordered table of phases. Each phase has a checkpoint file in the
//! output directory; a phase whose checkpoint exists is complete and is skipped. On start
//! the first incomplete phase is located and, unless it is the first phase, the bin group
//! is reloaded from the checkpoint of the phase before it. A failed phase writes nothing,
//! so the next run repeats it in full.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use num_format::{Locale, ToFormattedString};
use rustc_hash::FxHashMap;

use crate::bin_group::BinGroup;
use crate::bin_parms::BinParms;
use crate::binning::BinningEngine;
use crate::collaborators::{GenomeSource, SeedProteinFinder};
use crate::contigs::{scan_contigs, write_contig};
use crate::seed_search::find_starter_bins;

/// Seed-search contigs written by the load phase.
pub const REDUCED_FASTA_NAME: &str = "reduced.fasta";
pub const BIN_REPORT_NAME: &str = "bins.tsv";
pub const STATS_NAME: &str = "stats.tsv";
pub const UNBINNED_NAME: &str = "unbinned.fasta";

type PhaseFn = fn(&mut Pipeline, BinGroup) -> Result<BinGroup>;

/// Pipeline phase descriptor.
pub struct Phase {
    pub name: &'static str,
    pub checkpoint: &'static str,
    run: PhaseFn,
}

pub const PHASES: [Phase; 4] = [
    Phase { name: "CONTIG-LOAD", checkpoint: "bins.contigs.json", run: load_phase },
    Phase { name: "SEED-SEARCH", checkpoint: "bins.starter.json", run: seed_phase },
    Phase { name: "CONTIG-ASSIGNMENT", checkpoint: "bins.kmers.json", run: assignment_phase },
    Phase { name: "REPORTING", checkpoint: "bins.json", run: report_phase },
];

/// Everything the phases need besides the bin group.
pub struct Pipeline {
    in_file: PathBuf,
    out_dir: PathBuf,
    parms: BinParms,
    finder: Box<dyn SeedProteinFinder>,
    genomes: Box<dyn GenomeSource>,
    engine: Box<dyn BinningEngine>,
}

impl Pipeline {
    pub fn new(
        in_file: &Path,
        out_dir: &Path,
        parms: BinParms,
        finder: Box<dyn SeedProteinFinder>,
        genomes: Box<dyn GenomeSource>,
        engine: Box<dyn BinningEngine>,
    ) -> Self {
        Pipeline {
            in_file: in_file.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            parms,
            finder,
            genomes,
            engine,
        }
    }

    fn checkpoint(&self, phase: &Phase) -> PathBuf {
        self.out_dir.join(phase.checkpoint)
    }

    /// Index of the first phase without a checkpoint.
    pub fn first_pending(&self) -> Option<usize> {
        PHASES.iter().position(|phase| !self.checkpoint(phase).is_file())
    }

    /// Run every pending phase and return the final bin group.
    pub fn run(&mut self) -> Result<BinGroup> {
        let Some(first) = self.first_pending() else {
            info!("All phases are complete.");
            let last = self.checkpoint(&PHASES[PHASES.len() - 1]);
            return Ok(BinGroup::load(&last)?);
        };

        let mut group = if first == 0 {
            BinGroup::new()
        } else {
            let resume = self.checkpoint(&PHASES[first - 1]);
            info!("Resuming after phase {}.", PHASES[first - 1].name);
            BinGroup::load(&resume)?
        };

        for phase in &PHASES[first..] {
            info!("Starting phase {}.", phase.name);
            group = (phase.run)(self, group).with_context(|| format!("Phase {} failed", phase.name))?;
            group.save(&self.checkpoint(phase))?;
            info!(
                "Phase {} complete: {} bins containing {} contigs.",
                phase.name,
                group.len().to_formatted_string(&Locale::en),
                group.contig_count().to_formatted_string(&Locale::en)
            );
        }

        Ok(group)
    }

    /// Contig file the group was built from.
    fn source_file(&self, group: &BinGroup) -> PathBuf {
        group.input_file().map(Path::to_path_buf).unwrap_or_else(|| self.in_file.clone())
    }
}

fn load_phase(pipeline: &mut Pipeline, _group: BinGroup) -> Result<BinGroup> {
    let reduced_file = pipeline.out_dir.join(REDUCED_FASTA_NAME);
    let group = BinGroup::load_from_fasta(&pipeline.in_file, &pipeline.parms, &reduced_file)?;
    Ok(group)
}

fn seed_phase(pipeline: &mut Pipeline, mut group: BinGroup) -> Result<BinGroup> {
    let reduced_file = pipeline.out_dir.join(REDUCED_FASTA_NAME);
    find_starter_bins(
        &mut group,
        &reduced_file,
        &pipeline.out_dir,
        &pipeline.parms,
        pipeline.finder.as_mut(),
        pipeline.genomes.as_mut(),
    )?;
    Ok(group)
}

fn assignment_phase(pipeline: &mut Pipeline, mut group: BinGroup) -> Result<BinGroup> {
    let starters = group.significant_bin_ids();
    let in_file = pipeline.source_file(&group);
    info!("Assigning contigs to {} starter bins.", starters.len());
    pipeline
        .engine
        .classify(&starters, &mut group, &in_file, pipeline.genomes.as_mut())?;
    Ok(group)
}

fn report_phase(pipeline: &mut Pipeline, group: BinGroup) -> Result<BinGroup> {
    let in_file = pipeline.source_file(&group);
    let out_dir = &pipeline.out_dir;

    let file_names = write_bin_report(&group, &out_dir.join(BIN_REPORT_NAME))?;
    write_stats(&group, &out_dir.join(STATS_NAME))?;
    write_bin_files(&group, &in_file, out_dir, &file_names)?;
    group.write_unplaced(&in_file, &out_dir.join(UNBINNED_NAME))?;

    Ok(group)
}

/// File name for the sequences of a significant bin.
fn bin_file_name(taxon_id: Option<u32>, bin_id: &str) -> String {
    match taxon_id {
        Some(taxon_id) => format!("bin.{taxon_id}.fasta"),
        None => format!("bin.{bin_id}.fasta"),
    }
}

/// Write the bin summary table, returning the sequence file name of each bin.
fn write_bin_report(group: &BinGroup, out_file: &Path) -> Result<FxHashMap<String, String>> {
    let mut writer = BufWriter::new(File::create(out_file)?);
    writeln!(writer, "name\ttaxon_id\tref_genomes\tcoverage\tlength\tfile")?;

    let mut file_names = FxHashMap::default();
    for bin in group.significant_bins() {
        let file_name = bin_file_name(bin.taxon_id(), bin.id());
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.2}\t{}\t{}",
            bin.name(),
            bin.taxon_id().map(|id| id.to_string()).unwrap_or_default(),
            bin.ref_genomes().join(","),
            bin.coverage(),
            bin.length(),
            file_name
        )?;
        file_names.insert(bin.id().to_string(), file_name);
    }
    writer.flush()?;

    info!("{} bins written to {}.", file_names.len(), out_file.display());
    Ok(file_names)
}

fn write_stats(group: &BinGroup, out_file: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(out_file)?);
    writeln!(writer, "counter\tcount")?;
    for (name, count) in group.stats().iter() {
        writeln!(writer, "{name}\t{count}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Copy the contigs of each significant bin to the bin's sequence file.
fn write_bin_files(
    group: &BinGroup,
    in_file: &Path,
    out_dir: &Path,
    file_names: &FxHashMap<String, String>,
) -> Result<()> {
    let mut writers: FxHashMap<&str, BufWriter<File>> = FxHashMap::default();
    for (bin_id, file_name) in file_names {
        writers.insert(bin_id.as_str(), BufWriter::new(File::create(out_dir.join(file_name))?));
    }

    scan_contigs(in_file, |contig| {
        if let Some(writer) = group
            .contig_bin_id(&contig.label)
            .and_then(|bin_id| writers.get_mut(bin_id))
        {
            write_contig(writer, &contig.label, &contig.seq)?;
        }
        Ok(())
    })?;

    for writer in writers.values_mut() {
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::KmerBinningEngine;
    use crate::collaborators::{DnaHit, Genome, GenomeContig, RefGenomeHits, SeedHits, SeedLocation};
    use crate::kmer_db::DnaKmerDb;
    use std::fs::{read_to_string, write};
    use tempfile::tempdir;

    const GENOME_A: &str = "ATGGCTAGCAAAGGCGAAGAACTGTTTACCGGCGTGGTGCCGATTCTGGTGGAACTGGAT";
    const GENOME_B: &str = "ATGCGTAAAGGAGAAGAACTTTTCACTGGAGTTGTCCCAATTCTTGTTGAATTAGATGGT";
    const STARTER_1: &str = "CCTAGGTCAATCGGATCCGTTAGCAGTCAATGCCTACGGA";
    const STARTER_2: &str = "GATCATGCAGGTCCTTAAGCCGATGACTTGCAGGCATTCA";

    /// Finder reporting one seed protein on each of s1 and s2.
    struct StubFinder;

    impl SeedProteinFinder for StubFinder {
        fn find_seed_proteins(&mut self, _fasta_file: &Path) -> Result<SeedHits> {
            let locs = ["s1", "s2"]
                .iter()
                .map(|contig_id| SeedLocation { contig_id: contig_id.to_string(), start: 1, end: 40, strand: '+' })
                .collect();
            Ok(SeedHits::from([("PhenTrnaSyntAlph".to_string(), locs)]))
        }

        fn find_ref_genomes(&mut self, _seeds: &SeedHits, _fasta_file: &Path) -> Result<RefGenomeHits> {
            let hits = [("s1", 562, "g1"), ("s2", 1280, "g2")].map(|(contig_id, taxon_id, ref_id)| {
                let hit = DnaHit {
                    contig_id: contig_id.to_string(),
                    role_id: "PhenTrnaSyntAlph".to_string(),
                    taxon_id,
                    ref_id: ref_id.to_string(),
                    score: 100.0,
                };
                (contig_id.to_string(), hit)
            });
            Ok(RefGenomeHits::from(hits))
        }
    }

    struct StubGenomes;

    impl GenomeSource for StubGenomes {
        fn get_genome(&mut self, genome_id: &str) -> Result<Genome> {
            let (taxon_id, seq) = match genome_id {
                "g1" => (562, GENOME_A),
                "g2" => (1280, GENOME_B),
                _ => anyhow::bail!("unknown genome {genome_id}"),
            };
            Ok(Genome {
                id: genome_id.to_string(),
                name: format!("Genome {genome_id}"),
                taxon_id,
                contigs: vec![GenomeContig { id: "chr".to_string(), seq: seq.to_string() }],
            })
        }
    }

    struct FailingEngine;

    impl BinningEngine for FailingEngine {
        fn classify(&mut self, _: &[String], group: &mut BinGroup, _: &Path, _: &mut dyn GenomeSource) -> Result<()> {
            group.count("kmer-contig-placed");
            anyhow::bail!("k-mer engine interrupted")
        }
    }

    fn parms() -> BinParms {
        BinParms {
            len_filter: 30,
            bin_len_filter: 20,
            covg_filter: 5.0,
            bin_covg_filter: 5.0,
            bin_strength: 10,
            dang_len: 12,
            ..Default::default()
        }
    }

    fn contig_file(dir: &Path) -> Result<PathBuf> {
        let in_file = dir.join("contigs.fasta");
        write(
            &in_file,
            format!(
                ">s1 cov=20\n{STARTER_1}\n>s2 cov=30\n{STARTER_2}\n>u1 cov=20\n{}\n>u2 cov=30\n{}\n\
                 >rep cov=20\n{}\n>u3 cov=10\n{}\n>bad cov=20\nACGT\n",
                &GENOME_A[5..40],
                &GENOME_B[..30],
                &STARTER_1[..20],
                "T".repeat(40)
            ),
        )?;
        Ok(in_file)
    }

    fn pipeline(in_file: &Path, out_dir: &Path, engine: Box<dyn BinningEngine>) -> Pipeline {
        Pipeline::new(in_file, out_dir, parms(), Box::new(StubFinder), Box::new(StubGenomes), engine)
    }

    fn kmer_engine() -> Box<dyn BinningEngine> {
        Box::new(KmerBinningEngine::new(Box::new(DnaKmerDb::new(8)), &parms()))
    }

    fn bin_members(group: &BinGroup) -> Vec<(String, Vec<String>, Vec<String>)> {
        group
            .iter()
            .map(|bin| {
                (
                    bin.id().to_string(),
                    bin.contigs().iter().cloned().collect(),
                    bin.ref_genomes().to_vec(),
                )
            })
            .collect()
    }

    #[test]
    fn test_full_run() -> Result<()> {
        let temp_dir = tempdir()?;
        let in_file = contig_file(temp_dir.path())?;
        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir_all(&out_dir)?;

        let group = pipeline(&in_file, &out_dir, kmer_engine()).run()?;

        for phase in &PHASES {
            assert!(out_dir.join(phase.checkpoint).is_file());
        }
        assert_eq!(group.significant_bin_ids(), vec!["s1", "s2"]);
        assert_eq!(group.contig_bin_id("u1"), Some("s1"));
        assert_eq!(group.contig_bin_id("rep"), Some("s1"));
        assert_eq!(group.contig_bin_id("u2"), Some("s2"));
        assert_eq!(group.contig_bin_id("bad"), None);

        let report = read_to_string(out_dir.join(BIN_REPORT_NAME))?;
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "name\ttaxon_id\tref_genomes\tcoverage\tlength\tfile");
        assert_eq!(lines[1], "Genome g1 clonal population\t562\tg1\t20.00\t95\tbin.562.fasta");
        assert_eq!(lines.len(), 3);

        let bin_fasta = read_to_string(out_dir.join("bin.562.fasta"))?;
        assert_eq!(bin_fasta.matches('>').count(), 3);
        let unbinned = read_to_string(out_dir.join(UNBINNED_NAME))?;
        assert_eq!(unbinned, format!(">u3\n{}\n", "T".repeat(40)));

        let stats = read_to_string(out_dir.join(STATS_NAME))?;
        assert!(stats.lines().any(|line| line == "contig-in\t7"));
        assert!(stats.lines().any(|line| line == "seed-species-found\t2"));

        Ok(())
    }

    #[test]
    fn test_resume_after_failure() -> Result<()> {
        let temp_dir = tempdir()?;
        let in_file = contig_file(temp_dir.path())?;

        let clean_dir = temp_dir.path().join("clean");
        std::fs::create_dir_all(&clean_dir)?;
        let expected = pipeline(&in_file, &clean_dir, kmer_engine()).run()?;

        let out_dir = temp_dir.path().join("resumed");
        std::fs::create_dir_all(&out_dir)?;
        let result = pipeline(&in_file, &out_dir, Box::new(FailingEngine)).run();
        assert!(result.is_err());
        assert!(out_dir.join(PHASES[1].checkpoint).is_file());
        assert!(!out_dir.join(PHASES[2].checkpoint).is_file());

        let mut resumed = pipeline(&in_file, &out_dir, kmer_engine());
        assert_eq!(resumed.first_pending(), Some(2));
        let group = resumed.run()?;

        assert_eq!(bin_members(&group), bin_members(&expected));
        assert_eq!(group.stats(), expected.stats());
        assert_eq!(
            read_to_string(out_dir.join(BIN_REPORT_NAME))?,
            read_to_string(clean_dir.join(BIN_REPORT_NAME))?
        );

        // a completed run is not repeated
        let mut done = pipeline(&in_file, &out_dir, Box::new(FailingEngine));
        assert_eq!(done.first_pending(), None);
        assert_eq!(bin_members(&done.run()?), bin_members(&expected));

        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let temp_dir = tempdir().unwrap();
        let mut pipeline = pipeline(&temp_dir.path().join("none.fasta"), temp_dir.path(), kmer_engine());
        assert!(pipeline.run().is_err());
        assert!(!temp_dir.path().join(PHASES[0].checkpoint).exists());
    }
}
