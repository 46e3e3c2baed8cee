
//! The `BinGroup` owns every live bin along with the index from contig label to owning bin.
//!
//! Bins are keyed by their identity (the label of the contig that founded them) and refer to
//! their contigs by label only. Merging moves the source bin's contigs into the target and
//! re-points the index, so each admitted contig always resolves to exactly one live bin.
//! The group also carries named statistics counters and the path of the contig file it was
//! built from, and can be checkpointed to and restored from JSON.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use num_format::{Locale, ToFormattedString};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::bin::{Bin, BinStatus};
use crate::bin_parms::BinParms;
use crate::contigs::{scan_contigs, write_contig, ContigFilter};
use crate::error::{BinError, Result};

/// Named monotonic counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountMap(BTreeMap<String, u64>);

impl CountMap {
    pub fn count(&mut self, name: &str, delta: u64) {
        *self.0.entry(name.to_string()).or_insert(0) += delta;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Counters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

/// Serialized form of a bin group. The contig index is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GroupRecord {
    #[serde(default)]
    bins: Vec<Bin>,
    #[serde(default)]
    counts: CountMap,
    #[serde(default)]
    in_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BinGroup {
    bins: BTreeMap<String, Bin>,
    contig_map: FxHashMap<String, String>,
    stats: CountMap,
    input_file: Option<PathBuf>,
}

impl BinGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bin group from an assembly, writing seed-search contigs to `reduced_file`.
    pub fn load_from_fasta(fasta_file: &Path, parms: &BinParms, reduced_file: &Path) -> Result<Self> {
        let mut group = BinGroup::new();
        group.input_file = Some(fasta_file.to_path_buf());

        let filter = ContigFilter::new(parms);
        let mut writer = BufWriter::new(File::create(reduced_file)?);
        let mut seed_usable = 0u64;

        info!("Reading contigs from {}.", fasta_file.display());
        scan_contigs(fasta_file, |contig| {
            let bin = filter.compute_bin(&contig, &mut group.stats);
            match bin.status() {
                BinStatus::Bad => return Ok(()),
                BinStatus::SeedUsable => {
                    write_contig(&mut writer, &contig.label, &contig.seq)?;
                    seed_usable += 1;
                }
                _ => {}
            }
            group.add_bin(bin)
        })?;
        writer.flush()?;

        info!(
            "{} seed-search contigs written to {}, {} saved for binning.",
            seed_usable.to_formatted_string(&Locale::en),
            reduced_file.display(),
            group.len().to_formatted_string(&Locale::en)
        );

        Ok(group)
    }

    /// Add a bin, indexing all of its contigs.
    ///
    /// Fails without modifying the group if any contig is already indexed.
    pub fn add_bin(&mut self, bin: Bin) -> Result<()> {
        if self.bins.contains_key(bin.id()) {
            return Err(BinError::DataIntegrity(format!("Duplicate bin ID {}.", bin.id())));
        }
        if let Some(dup) = bin.contigs().iter().find(|c| self.contig_map.contains_key(*c)) {
            return Err(BinError::DataIntegrity(format!(
                "Contig {dup} is already in bin {}.",
                self.contig_map[dup]
            )));
        }

        for contig in bin.contigs() {
            self.contig_map.insert(contig.clone(), bin.id().to_string());
        }
        self.bins.insert(bin.id().to_string(), bin);

        Ok(())
    }

    /// Merge the source bin into the target bin.
    ///
    /// The source bin leaves the group and all of its contigs are re-pointed to the target.
    pub fn merge(&mut self, target_id: &str, source_id: &str) -> Result<()> {
        if target_id == source_id {
            return Err(BinError::DataIntegrity(format!("Attempt to merge bin {target_id} into itself.")));
        }
        if !self.bins.contains_key(target_id) {
            return Err(BinError::DataIntegrity(format!("Merge target {target_id} is not in the group.")));
        }
        let source = self.bins.remove(source_id).ok_or_else(|| {
            BinError::DataIntegrity(format!("Merge source {source_id} is not in the group."))
        })?;

        for contig in source.contigs() {
            self.contig_map.insert(contig.clone(), target_id.to_string());
        }
        if let Some(target) = self.bins.get_mut(target_id) {
            target.absorb(source);
        }

        Ok(())
    }

    /// Find the bin containing a contig, or `None` if the contig was filtered out.
    pub fn contig_bin(&self, label: &str) -> Option<&Bin> {
        self.contig_map.get(label).and_then(|id| self.bins.get(id))
    }

    /// Identity of the bin containing a contig.
    pub fn contig_bin_id(&self, label: &str) -> Option<&str> {
        self.contig_map.get(label).map(String::as_str)
    }

    pub fn bin(&self, id: &str) -> Option<&Bin> {
        self.bins.get(id)
    }

    pub fn bin_mut(&mut self, id: &str) -> Option<&mut Bin> {
        self.bins.get_mut(id)
    }

    /// Significant bins, ordered by bin identity.
    pub fn significant_bins(&self) -> Vec<&Bin> {
        self.bins.values().filter(|bin| bin.is_significant()).collect()
    }

    pub fn significant_bin_ids(&self) -> Vec<String> {
        self.significant_bins().iter().map(|bin| bin.id().to_string()).collect()
    }

    /// True if the contig belongs to a significant bin.
    pub fn is_placed(&self, label: &str) -> bool {
        self.contig_bin(label).is_some_and(Bin::is_significant)
    }

    pub fn count(&mut self, name: &str) {
        self.stats.count(name, 1);
    }

    pub fn count_by(&mut self, name: &str, delta: u64) {
        self.stats.count(name, delta);
    }

    pub fn get_count(&self, name: &str) -> u64 {
        self.stats.get(name)
    }

    pub fn stats(&self) -> &CountMap {
        &self.stats
    }

    /// Number of live bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Number of admitted contigs.
    pub fn contig_count(&self) -> usize {
        self.contig_map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bin> {
        self.bins.values()
    }

    pub fn input_file(&self) -> Option<&Path> {
        self.input_file.as_deref()
    }

    pub fn set_input_file(&mut self, input_file: &Path) {
        self.input_file = Some(input_file.to_path_buf());
    }

    /// Save the group as JSON.
    ///
    /// The file is written beside its final location and renamed into place, so an
    /// interrupted save never leaves a partial checkpoint behind.
    pub fn save(&self, out_file: &Path) -> Result<()> {
        let record = GroupRecord {
            bins: self.bins.values().cloned().collect(),
            counts: self.stats.clone(),
            in_file: self
                .input_file
                .as_ref()
                .map(|path| std::path::absolute(path).unwrap_or_else(|_| path.clone())),
        };

        let mut tmp_name = out_file.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_file = PathBuf::from(tmp_name);
        {
            let mut writer = BufWriter::new(File::create(&tmp_file)?);
            serde_json::to_writer_pretty(&mut writer, &record)
                .map_err(|e| BinError::Io(std::io::Error::other(e)))?;
            writer.flush()?;
        }
        fs::rename(&tmp_file, out_file)?;

        info!("Bin group saved to {}.", out_file.display());
        Ok(())
    }

    /// Load a group saved by `save`.
    pub fn load(in_file: &Path) -> Result<Self> {
        info!("Loading bin group from {}.", in_file.display());
        let reader = BufReader::new(
            File::open(in_file).map_err(|e| BinError::input(in_file, format!("cannot open checkpoint: {e}")))?,
        );
        let record: GroupRecord =
            serde_json::from_reader(reader).map_err(|e| BinError::format(in_file, e))?;

        let mut group = BinGroup::new();
        for bin in record.bins {
            if bin.contigs().is_empty() {
                return Err(BinError::format(in_file, format!("bin {} has no contigs", bin.id())));
            }
            if !bin.contigs().contains(bin.id()) {
                return Err(BinError::format(
                    in_file,
                    format!("bin {} does not contain its founding contig", bin.id()),
                ));
            }
            group.add_bin(bin).map_err(|e| BinError::format(in_file, e))?;
        }
        group.stats = record.counts;
        group.input_file = record.in_file;

        info!(
            "{} contigs and {} bins read from {}.",
            group.contig_count().to_formatted_string(&Locale::en),
            group.len().to_formatted_string(&Locale::en),
            in_file.display()
        );
        Ok(group)
    }

    /// Copy every admitted contig that never reached a significant bin to a FASTA file.
    pub fn write_unplaced(&self, in_file: &Path, out_file: &Path) -> Result<()> {
        info!("Transferring unplaced sequences from {} to {}.", in_file.display(), out_file.display());
        let mut writer = BufWriter::new(File::create(out_file)?);
        let (mut out_count, mut skip_count, mut place_count) = (0u64, 0u64, 0u64);

        scan_contigs(in_file, |contig| {
            match self.contig_bin(&contig.label) {
                None => skip_count += 1,
                Some(bin) if bin.is_significant() => place_count += 1,
                Some(_) => {
                    write_contig(&mut writer, &contig.label, &contig.seq)?;
                    out_count += 1;
                }
            }
            Ok(())
        })?;
        writer.flush()?;

        if out_count + place_count < self.contig_count() as u64 {
            warn!("Some admitted contigs were not found in {}.", in_file.display());
        }
        info!(
            "{} contigs are placed, {} have been rejected, {} written to {}.",
            place_count,
            skip_count,
            out_count,
            out_file.display()
        );
        Ok(())
    }
}

/// Check that every admitted contig resolves to exactly one live bin.
#[cfg(test)]
pub(crate) fn assert_partition(group: &BinGroup, admitted: &[&str]) {
    use std::collections::BTreeSet;

    let mut seen = BTreeSet::new();
    for bin in group.iter() {
        for contig in bin.contigs() {
            assert!(seen.insert(contig.clone()), "contig {contig} is in two bins");
            assert_eq!(group.contig_bin_id(contig), Some(bin.id()));
        }
    }
    let expected: BTreeSet<String> = admitted.iter().map(|s| s.to_string()).collect();
    assert_eq!(seen, expected);
    assert_eq!(group.contig_count(), admitted.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn single(label: &str, len: u64, coverage: f64) -> Bin {
        Bin::new(label, len, coverage, BinStatus::Usable)
    }

    fn sample_group() -> BinGroup {
        let mut group = BinGroup::new();
        for (label, len, covg) in [("c1", 100, 10.0), ("c2", 300, 20.0), ("c3", 100, 30.0), ("c4", 50, 5.0)] {
            group.add_bin(single(label, len, covg)).unwrap();
        }
        group
    }

    #[test]
    fn test_add_bin_rejects_duplicates() {
        let mut group = sample_group();
        let result = group.add_bin(single("c2", 10, 1.0));
        assert!(matches!(result, Err(BinError::DataIntegrity(_))));

        // a new bin containing an indexed contig under another ID
        let mut other = single("c9", 10, 1.0);
        other.absorb(single("c3", 10, 1.0));
        assert!(matches!(group.add_bin(other), Err(BinError::DataIntegrity(_))));

        assert_eq!(group.len(), 4);
        assert_eq!(group.contig_bin_id("c9"), None);
        assert_partition(&group, &["c1", "c2", "c3", "c4"]);
    }

    #[test]
    fn test_merge() {
        let mut group = sample_group();

        group.merge("c1", "c2").unwrap();
        assert_partition(&group, &["c1", "c2", "c3", "c4"]);
        group.merge("c3", "c4").unwrap();
        assert_partition(&group, &["c1", "c2", "c3", "c4"]);
        group.merge("c1", "c3").unwrap();
        assert_partition(&group, &["c1", "c2", "c3", "c4"]);

        assert_eq!(group.len(), 1);
        let bin = group.bin("c1").unwrap();
        assert_eq!(bin.length(), 550);
        let expected = (100.0 * 10.0 + 300.0 * 20.0 + 100.0 * 30.0 + 50.0 * 5.0) / 550.0;
        assert!((bin.coverage() - expected).abs() < 1e-9);
        assert_eq!(group.contig_bin("c4").unwrap().id(), "c1");
    }

    #[test]
    fn test_merge_guards() {
        let mut group = sample_group();
        assert!(matches!(group.merge("c1", "c1"), Err(BinError::DataIntegrity(_))));

        group.merge("c1", "c2").unwrap();
        // c2 is orphaned; a second merge must be refused and leave c1 untouched
        let before = group.bin("c1").unwrap().clone();
        assert!(matches!(group.merge("c1", "c2"), Err(BinError::DataIntegrity(_))));
        assert!(matches!(group.merge("c2", "c3"), Err(BinError::DataIntegrity(_))));
        assert_eq!(group.bin("c1").unwrap(), &before);
        assert_partition(&group, &["c1", "c2", "c3", "c4"]);
    }

    #[test]
    fn test_significant_bins_ordered() {
        let mut group = sample_group();
        group.bin_mut("c3").unwrap().set_tax_info(2, "B species", "", "2.1");
        group.bin_mut("c1").unwrap().set_tax_info(1, "A species", "", "1.1");

        let ids: Vec<&str> = group.significant_bins().iter().map(|bin| bin.id()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert!(group.is_placed("c3"));
        assert!(!group.is_placed("c2"));
        assert!(!group.is_placed("missing"));
    }

    #[test]
    fn test_counts() {
        let mut group = BinGroup::new();
        group.count("a");
        group.count("a");
        group.count_by("b", 5);
        assert_eq!(group.get_count("a"), 2);
        assert_eq!(group.get_count("b"), 5);
        assert_eq!(group.get_count("c"), 0);
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let temp_dir = tempdir()?;

        // empty group
        let empty = BinGroup::new();
        let path = temp_dir.path().join("empty.json");
        empty.save(&path)?;
        assert_eq!(BinGroup::load(&path)?, empty);

        // one bin
        let mut one = BinGroup::new();
        one.add_bin(single("c1", 100, 7.25))?;
        one.count_by("contig-in", 3);
        let path = temp_dir.path().join("one.json");
        one.save(&path)?;
        assert_eq!(BinGroup::load(&path)?, one);

        // several bins, one significant with multiple reference genomes
        let mut group = sample_group();
        group.set_input_file(&temp_dir.path().join("contigs.fasta"));
        group.merge("c1", "c2")?;
        {
            let bin = group.bin_mut("c1").unwrap();
            bin.set_tax_info(562, "Escherichia coli clonal population", "clonal population", "562.1");
            bin.add_ref_genome("562.7");
        }
        group.count_by("kmer-contig-Placed", 12);
        let path = temp_dir.path().join("group.json");
        group.save(&path)?;
        assert!(!temp_dir.path().join("group.json.tmp").exists());

        let loaded = BinGroup::load(&path)?;
        assert_eq!(loaded, group);
        assert_eq!(loaded.bin("c1").unwrap().ref_genomes(), &["562.1".to_string(), "562.7".to_string()]);
        assert_eq!(loaded.contig_bin_id("c2"), Some("c1"));
        assert_partition(&loaded, &["c1", "c2", "c3", "c4"]);

        Ok(())
    }

    #[test]
    fn test_load_rejects_bad_records() -> Result<()> {
        let temp_dir = tempdir()?;

        let path = temp_dir.path().join("garbage.json");
        fs::write(&path, "{ not json")?;
        assert!(matches!(BinGroup::load(&path), Err(BinError::Format { .. })));

        let path = temp_dir.path().join("nobody.json");
        fs::write(
            &path,
            r#"{"bins":[{"id":"c1","name":"c1","contigs":[],"len":0,"coverage":0.0,
                "status":"USABLE","significant":false}],"counts":{}}"#,
        )?;
        assert!(matches!(BinGroup::load(&path), Err(BinError::Format { .. })));

        let path = temp_dir.path().join("dup.json");
        fs::write(
            &path,
            r#"{"bins":[
                {"id":"c1","name":"c1","contigs":["c1","c2"],"len":10,"coverage":1.0,"status":"VIRTUAL","significant":false},
                {"id":"c2","name":"c2","contigs":["c2"],"len":5,"coverage":1.0,"status":"USABLE","significant":false}
            ],"counts":{"x":1}}"#,
        )?;
        assert!(matches!(BinGroup::load(&path), Err(BinError::Format { .. })));

        assert!(matches!(
            BinGroup::load(&temp_dir.path().join("missing.json")),
            Err(BinError::Input { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_load_from_fasta_and_unplaced() -> Result<()> {
        let temp_dir = tempdir()?;
        let fasta = temp_dir.path().join("contigs.fasta");
        let seq = |n: usize| "ACGT".repeat(n / 4);
        fs::write(
            &fasta,
            format!(
                ">big cov=20\n{}\n>small cov=20\n{}\n>tiny cov=20\n{}\n>thin cov=1\n{}\n>other cov=8\n{}\n",
                seq(600),
                seq(400),
                seq(100),
                seq(600),
                seq(800)
            ),
        )?;
        let reduced = temp_dir.path().join("reduced.fasta");
        let parms = BinParms { covg_filter: 10.0, ..Default::default() };

        let mut group = BinGroup::load_from_fasta(&fasta, &parms, &reduced)?;
        assert_partition(&group, &["big", "small", "other"]);
        assert_eq!(group.bin("big").unwrap().status(), BinStatus::SeedUsable);
        assert_eq!(group.bin("small").unwrap().status(), BinStatus::Usable);
        assert_eq!(group.bin("other").unwrap().status(), BinStatus::Usable);
        assert_eq!(group.get_count("contig-in"), 5);
        assert_eq!(group.get_count("contig-rejected"), 2);
        assert_eq!(group.input_file(), Some(fasta.as_path()));

        let mut reduced_labels = Vec::new();
        scan_contigs(&reduced, |contig| {
            reduced_labels.push(contig.label);
            Ok(())
        })?;
        assert_eq!(reduced_labels, vec!["big"]);

        group.bin_mut("big").unwrap().set_tax_info(1, "A", "", "1.1");
        group.merge("big", "small")?;
        let unplaced = temp_dir.path().join("unbinned.fasta");
        group.write_unplaced(&fasta, &unplaced)?;
        let mut unplaced_labels = Vec::new();
        scan_contigs(&unplaced, |contig| {
            unplaced_labels.push(contig.label);
            Ok(())
        })?;
        assert_eq!(unplaced_labels, vec!["other"]);

        Ok(())
    }
}
