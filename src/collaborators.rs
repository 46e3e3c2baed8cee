
//! Interfaces to the seed-protein search and the reference-genome database.
//!
//! The binning pipeline only depends on the `SeedProteinFinder` and `GenomeSource` traits.
//! This module also provides file-backed implementations: a finder that works from
//! precomputed seed-alignment tables, a local genome library, and an on-disk genome cache
//! that can wrap any source.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::bin_parms::BinParms;
use crate::contigs::scan_contigs;
use crate::error::BinError;

/// Name of the seed-protein alignment table in a finder directory.
pub const SEED_HITS_NAME: &str = "seed_hits.tsv";
/// Name of the reference-genome alignment table in a finder directory.
pub const REF_HITS_NAME: &str = "ref_hits.tsv";
/// Name of the genome index in a genome library.
pub const GENOME_INDEX_NAME: &str = "genomes.tsv";
/// Directory of cached genomes within the output directory.
pub const GENOME_CACHE_DIR: &str = "RefGenomes";

/// Location of a seed protein on a contig.
#[derive(Clone, Debug, PartialEq)]
pub struct SeedLocation {
    pub contig_id: String,
    pub start: u64,
    pub end: u64,
    pub strand: char,
}

/// Seed-protein locations keyed by role.
pub type SeedHits = BTreeMap<String, Vec<SeedLocation>>;

/// Best reference-genome match for the seed protein on a contig.
#[derive(Clone, Debug, PartialEq)]
pub struct DnaHit {
    pub contig_id: String,
    pub role_id: String,
    pub taxon_id: u32,
    pub ref_id: String,
    pub score: f64,
}

/// Reference-genome hits keyed by contig.
pub type RefGenomeHits = BTreeMap<String, DnaHit>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenomeContig {
    pub id: String,
    pub seq: String,
}

/// Reference genome with sequence and taxonomy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub id: String,
    pub name: String,
    pub taxon_id: u32,
    pub contigs: Vec<GenomeContig>,
}

impl Genome {
    pub fn total_len(&self) -> usize {
        self.contigs.iter().map(|c| c.seq.len()).sum()
    }
}

/// Locates seed proteins and resolves them to reference genomes.
pub trait SeedProteinFinder {
    fn find_seed_proteins(&mut self, fasta_file: &Path) -> Result<SeedHits>;

    fn find_ref_genomes(&mut self, seeds: &SeedHits, fasta_file: &Path) -> Result<RefGenomeHits>;
}

/// Provides full reference-genome records by ID.
pub trait GenomeSource {
    fn get_genome(&mut self, genome_id: &str) -> Result<Genome>;
}

/// Split a data line of a TSV file, skipping comments and blank lines.
fn tsv_fields(line: &str, expected: usize, path: &Path, line_no: usize) -> Result<Option<Vec<String>>> {
    if line.starts_with('#') || line.trim().is_empty() {
        return Ok(None);
    }

    let fields: Vec<String> = line.trim_end().split('\t').map(str::to_string).collect();
    if fields.len() != expected {
        return Err(BinError::format(
            path,
            format!("line {line_no} has {} columns, expected {expected}", fields.len()),
        )
        .into());
    }

    Ok(Some(fields))
}

fn parse_field<T: std::str::FromStr>(value: &str, what: &str, path: &Path, line_no: usize) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BinError::format(path, format!("invalid {what} `{value}` on line {line_no}")).into())
}

/// Seed-protein finder backed by precomputed alignment tables.
///
/// `seed_hits.tsv` holds seed-protein alignments to contigs (role, contig, start, end,
/// strand, e-value, aligned fraction). `ref_hits.tsv` holds the alignments of those
/// regions to reference genomes (contig, role, taxon, genome, score, e-value).
pub struct TableSeedFinder {
    seed_file: PathBuf,
    ref_file: PathBuf,
    max_e: f64,
    ref_max_e: f64,
    min_len: f64,
    max_gap: u64,
}

impl TableSeedFinder {
    pub fn new(finder_dir: &Path, parms: &BinParms) -> Result<Self> {
        let seed_file = finder_dir.join(SEED_HITS_NAME);
        let ref_file = finder_dir.join(REF_HITS_NAME);
        for file in [&seed_file, &ref_file] {
            if !file.is_file() {
                return Err(anyhow::anyhow!("Finder file {} does not exist.", file.display()));
            }
        }

        Ok(TableSeedFinder {
            seed_file,
            ref_file,
            max_e: parms.max_e,
            ref_max_e: parms.ref_max_e,
            min_len: parms.min_len,
            max_gap: parms.max_gap as u64,
        })
    }

    /// Merge locations on the same contig and strand separated by at most `max_gap` bases.
    fn merge_locations(&self, mut locs: Vec<SeedLocation>) -> Vec<SeedLocation> {
        locs.sort_by(|a, b| {
            (&a.contig_id, a.strand, a.start).cmp(&(&b.contig_id, b.strand, b.start))
        });

        let mut merged: Vec<SeedLocation> = Vec::with_capacity(locs.len());
        for loc in locs {
            match merged.last_mut() {
                Some(prev)
                    if prev.contig_id == loc.contig_id
                        && prev.strand == loc.strand
                        && loc.start <= prev.end + self.max_gap =>
                {
                    prev.end = prev.end.max(loc.end);
                }
                _ => merged.push(loc),
            }
        }

        merged
    }
}

fn contig_labels(fasta_file: &Path) -> Result<FxHashSet<String>> {
    let mut labels = FxHashSet::default();
    scan_contigs(fasta_file, |contig| {
        labels.insert(contig.label);
        Ok(())
    })?;
    Ok(labels)
}

impl SeedProteinFinder for TableSeedFinder {
    fn find_seed_proteins(&mut self, fasta_file: &Path) -> Result<SeedHits> {
        let labels = contig_labels(fasta_file)?;
        let file = File::open(&self.seed_file)
            .with_context(|| format!("Failed to open {}", self.seed_file.display()))?;

        let mut by_role: BTreeMap<String, Vec<SeedLocation>> = BTreeMap::new();
        let mut rejected = 0;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let Some(fields) = tsv_fields(&line, 7, &self.seed_file, idx + 1)? else {
                continue;
            };

            let path = self.seed_file.as_path();
            let start: u64 = parse_field(&fields[2], "start", path, idx + 1)?;
            let end: u64 = parse_field(&fields[3], "end", path, idx + 1)?;
            let strand: char = parse_field(&fields[4], "strand", path, idx + 1)?;
            let e_value: f64 = parse_field(&fields[5], "e-value", path, idx + 1)?;
            let fraction: f64 = parse_field(&fields[6], "aligned fraction", path, idx + 1)?;

            if !labels.contains(&fields[1]) || e_value > self.max_e || fraction < self.min_len {
                rejected += 1;
                continue;
            }

            by_role.entry(fields[0].clone()).or_default().push(SeedLocation {
                contig_id: fields[1].clone(),
                start: start.min(end),
                end: start.max(end),
                strand,
            });
        }
        debug!("{} seed-protein alignments rejected by the filters.", rejected);

        Ok(by_role
            .into_iter()
            .map(|(role, locs)| (role, self.merge_locations(locs)))
            .collect())
    }

    fn find_ref_genomes(&mut self, seeds: &SeedHits, _fasta_file: &Path) -> Result<RefGenomeHits> {
        let wanted: FxHashSet<(&str, &str)> = seeds
            .iter()
            .flat_map(|(role, locs)| locs.iter().map(move |loc| (role.as_str(), loc.contig_id.as_str())))
            .collect();

        let file = File::open(&self.ref_file)
            .with_context(|| format!("Failed to open {}", self.ref_file.display()))?;

        let mut best: RefGenomeHits = BTreeMap::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let Some(fields) = tsv_fields(&line, 6, &self.ref_file, idx + 1)? else {
                continue;
            };

            let path = self.ref_file.as_path();
            let taxon_id: u32 = parse_field(&fields[2], "taxon ID", path, idx + 1)?;
            let score: f64 = parse_field(&fields[4], "score", path, idx + 1)?;
            let e_value: f64 = parse_field(&fields[5], "e-value", path, idx + 1)?;

            if e_value > self.ref_max_e || !wanted.contains(&(fields[1].as_str(), fields[0].as_str())) {
                continue;
            }

            let hit = DnaHit {
                contig_id: fields[0].clone(),
                role_id: fields[1].clone(),
                taxon_id,
                ref_id: fields[3].clone(),
                score,
            };
            let better = match best.get(&hit.contig_id) {
                None => true,
                Some(prev) => hit.score > prev.score || (hit.score == prev.score && hit.ref_id < prev.ref_id),
            };
            if better {
                best.insert(hit.contig_id.clone(), hit);
            }
        }

        Ok(best)
    }
}

/// Save seed-protein locations as a table.
pub fn save_seed_proteins(seeds: &SeedHits, out_file: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(out_file)?);
    writeln!(writer, "role_id\tcontig_id\tstart\tend\tstrand")?;
    for (role, locs) in seeds {
        for loc in locs {
            writeln!(writer, "{}\t{}\t{}\t{}\t{}", role, loc.contig_id, loc.start, loc.end, loc.strand)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Save reference-genome hits as a table.
pub fn save_ref_genomes(hits: &RefGenomeHits, out_file: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(out_file)?);
    writeln!(writer, "contig_id\trole_id\ttaxon_id\tref_genome_id\tscore")?;
    for hit in hits.values() {
        writeln!(writer, "{}\t{}\t{}\t{}\t{}", hit.contig_id, hit.role_id, hit.taxon_id, hit.ref_id, hit.score)?;
    }
    writer.flush()?;
    Ok(())
}

/// Local library of reference genomes.
///
/// The library directory holds `genomes.tsv` (genome ID, taxon ID, name) and one FASTA
/// file per genome named after the genome ID.
pub struct DirectoryGenomeSource {
    dir: PathBuf,
    index: FxHashMap<String, (u32, String)>,
}

impl DirectoryGenomeSource {
    pub fn new(dir: &Path) -> Result<Self> {
        let index_file = dir.join(GENOME_INDEX_NAME);
        let file = File::open(&index_file)
            .with_context(|| format!("Failed to open genome index {}", index_file.display()))?;

        let mut index = FxHashMap::default();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let Some(fields) = tsv_fields(&line, 3, &index_file, idx + 1)? else {
                continue;
            };
            let taxon_id: u32 = parse_field(&fields[1], "taxon ID", &index_file, idx + 1)?;
            index.insert(fields[0].clone(), (taxon_id, fields[2].clone()));
        }
        info!("{} reference genomes available in {}.", index.len(), dir.display());

        Ok(DirectoryGenomeSource { dir: dir.to_path_buf(), index })
    }

    fn genome_file(&self, genome_id: &str) -> Option<PathBuf> {
        ["fna", "fasta", "fa"]
            .iter()
            .map(|ext| self.dir.join(format!("{genome_id}.{ext}")))
            .find(|path| path.is_file())
    }
}

impl GenomeSource for DirectoryGenomeSource {
    fn get_genome(&mut self, genome_id: &str) -> Result<Genome> {
        let (taxon_id, name) = self
            .index
            .get(genome_id)
            .cloned()
            .with_context(|| format!("Genome {genome_id} is not in the genome library."))?;
        let path = self
            .genome_file(genome_id)
            .with_context(|| format!("No sequence file found for genome {genome_id}."))?;

        let mut contigs = Vec::new();
        scan_contigs(&path, |contig| {
            contigs.push(GenomeContig {
                id: contig.label,
                seq: String::from_utf8_lossy(&contig.seq).into_owned(),
            });
            Ok(())
        })?;

        Ok(Genome { id: genome_id.to_string(), name, taxon_id, contigs })
    }
}

/// Caches genomes from another source as JSON files in a directory.
pub struct GenomeCache<S: GenomeSource> {
    source: S,
    cache_dir: PathBuf,
}

impl<S: GenomeSource> GenomeCache<S> {
    pub fn new(source: S, cache_dir: &Path) -> Result<Self> {
        if !cache_dir.is_dir() {
            info!("Creating genome cache directory {}.", cache_dir.display());
            fs::create_dir_all(cache_dir)?;
        }
        Ok(GenomeCache { source, cache_dir: cache_dir.to_path_buf() })
    }
}

impl<S: GenomeSource> GenomeCache<S> {
    fn read_cached(cache_file: &Path) -> Result<Genome> {
        let reader = BufReader::new(File::open(cache_file)?);
        serde_json::from_reader(reader)
            .with_context(|| format!("Invalid cached genome {}", cache_file.display()))
    }

    /// Write a genome beside its cache file and rename it into place.
    fn write_cached(cache_file: &Path, genome: &Genome) -> Result<()> {
        let mut tmp_name = cache_file.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_file = PathBuf::from(tmp_name);
        {
            let mut writer = BufWriter::new(File::create(&tmp_file)?);
            serde_json::to_writer(&mut writer, genome)?;
            writer.flush()?;
        }
        fs::rename(&tmp_file, cache_file)?;
        Ok(())
    }
}

impl<S: GenomeSource> GenomeSource for GenomeCache<S> {
    fn get_genome(&mut self, genome_id: &str) -> Result<Genome> {
        let cache_file = self.cache_dir.join(format!("{genome_id}.json"));
        if cache_file.is_file() {
            debug!("Reading genome {} from cache.", genome_id);
            match Self::read_cached(&cache_file) {
                Ok(genome) => return Ok(genome),
                Err(e) => warn!("{e:#}; fetching genome {genome_id} again."),
            }
        }

        let genome = self.source.get_genome(genome_id)?;
        Self::write_cached(&cache_file, &genome)?;

        Ok(genome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    fn finder_fixture(dir: &Path) -> Result<PathBuf> {
        write(
            dir.join(SEED_HITS_NAME),
            "# role\tcontig\tstart\tend\tstrand\tevalue\tfraction\n\
             PhenTrnaSyntAlph\tc1\t100\t400\t+\t1e-50\t0.9\n\
             PhenTrnaSyntAlph\tc1\t700\t900\t+\t1e-40\t0.8\n\
             PhenTrnaSyntAlph\tc1\t2000\t2300\t+\t1e-40\t0.8\n\
             PhenTrnaSyntAlph\tc2\t300\t10\t-\t1e-60\t0.95\n\
             PhenTrnaSyntAlph\tc3\t1\t300\t+\t1e-5\t0.95\n\
             PhenTrnaSyntAlph\tc2\t500\t700\t+\t1e-60\t0.2\n\
             PhenTrnaSyntAlph\tgone\t1\t300\t+\t1e-60\t0.95\n",
        )?;
        write(
            dir.join(REF_HITS_NAME),
            "c1\tPhenTrnaSyntAlph\t562\t562.1\t400\t1e-30\n\
             c1\tPhenTrnaSyntAlph\t562\t562.9\t500\t1e-30\n\
             c2\tPhenTrnaSyntAlph\t1280\t1280.5\t300\t1e-30\n\
             c2\tPhenTrnaSyntAlph\t1280\t1280.2\t300\t1e-30\n\
             c2\tPhenTrnaSyntAlph\t1280\t1280.1\t900\t1e-3\n\
             c3\tPhenTrnaSyntAlph\t28901\t28901.1\t300\t1e-30\n",
        )?;
        let fasta = dir.join("reduced.fasta");
        write(&fasta, ">c1\nACGT\n>c2\nACGT\n>c3\nACGT\n")?;
        Ok(fasta)
    }

    #[test]
    fn test_table_seed_finder() -> Result<()> {
        let temp_dir = tempdir()?;
        let fasta = finder_fixture(temp_dir.path())?;
        let parms = BinParms { max_e: 1e-20, ref_max_e: 1e-10, min_len: 0.5, max_gap: 600, ..Default::default() };
        let mut finder = TableSeedFinder::new(temp_dir.path(), &parms)?;

        let seeds = finder.find_seed_proteins(&fasta)?;
        let locs = &seeds["PhenTrnaSyntAlph"];
        assert_eq!(
            locs.iter().map(|l| (l.contig_id.as_str(), l.start, l.end)).collect::<Vec<_>>(),
            vec![("c1", 100, 900), ("c1", 2000, 2300), ("c2", 10, 300)]
        );

        let refs = finder.find_ref_genomes(&seeds, &fasta)?;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["c1"].ref_id, "562.9");
        // equal scores resolve to the smaller genome ID
        assert_eq!(refs["c2"].ref_id, "1280.2");
        assert_eq!(refs["c2"].taxon_id, 1280);

        save_seed_proteins(&seeds, &temp_dir.path().join("seeds.found.tbl"))?;
        save_ref_genomes(&refs, &temp_dir.path().join("ref.genomes.tbl"))?;
        let saved = fs::read_to_string(temp_dir.path().join("ref.genomes.tbl"))?;
        assert_eq!(saved.lines().count(), 3);

        Ok(())
    }

    #[test]
    fn test_bad_table() -> Result<()> {
        let temp_dir = tempdir()?;
        let fasta = finder_fixture(temp_dir.path())?;
        write(temp_dir.path().join(SEED_HITS_NAME), "role\tc1\t1\n")?;
        let mut finder = TableSeedFinder::new(temp_dir.path(), &BinParms::default())?;
        assert!(finder.find_seed_proteins(&fasta).is_err());
        Ok(())
    }

    #[test]
    fn test_genome_library_and_cache() -> Result<()> {
        let temp_dir = tempdir()?;
        let library = temp_dir.path().join("library");
        fs::create_dir_all(&library)?;
        write(library.join(GENOME_INDEX_NAME), "# id\ttaxon\tname\n562.1\t562\tEscherichia coli K-12\n")?;
        write(library.join("562.1.fna"), ">chr\nACGTACGT\n>plasmid\nGGCC\n")?;

        let cache_dir = temp_dir.path().join("RefGenomes");
        let mut genomes = GenomeCache::new(DirectoryGenomeSource::new(&library)?, &cache_dir)?;
        let genome = genomes.get_genome("562.1")?;
        assert_eq!(genome.name, "Escherichia coli K-12");
        assert_eq!(genome.taxon_id, 562);
        assert_eq!(genome.total_len(), 12);
        assert!(cache_dir.join("562.1.json").is_file());

        // served from the cache once the library copy is gone
        fs::remove_file(library.join("562.1.fna"))?;
        assert_eq!(genomes.get_genome("562.1")?, genome);

        assert!(genomes.get_genome("999.1").is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_cache_is_refetched() -> Result<()> {
        let temp_dir = tempdir()?;
        let library = temp_dir.path().join("library");
        fs::create_dir_all(&library)?;
        write(library.join(GENOME_INDEX_NAME), "562.1\t562\tEscherichia coli K-12\n")?;
        write(library.join("562.1.fna"), ">chr\nACGTACGT\n")?;

        // left behind by an interrupted run
        let cache_dir = temp_dir.path().join("RefGenomes");
        fs::create_dir_all(&cache_dir)?;
        write(cache_dir.join("562.1.json"), r#"{"id":"562.1","na"#)?;

        let mut genomes = GenomeCache::new(DirectoryGenomeSource::new(&library)?, &cache_dir)?;
        let genome = genomes.get_genome("562.1")?;
        assert_eq!(genome.name, "Escherichia coli K-12");
        assert_eq!(genome.total_len(), 8);
        assert!(!cache_dir.join("562.1.json.tmp").exists());

        // the rewritten cache entry is complete
        let cached: Genome = serde_json::from_str(&fs::read_to_string(cache_dir.join("562.1.json"))?)?;
        assert_eq!(cached, genome);
        Ok(())
    }
}
