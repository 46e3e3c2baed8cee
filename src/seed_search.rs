
//! Construction of starter bins from seed-protein hits.
//!
//! Seed proteins are near-universal single-copy markers, so each species in the sample is
//! expected to contribute one hit per marker role. Hits resolved to reference genomes are
//! grouped by taxon; within a taxon the best-scoring contig becomes the master bin and every
//! other hit's contig is merged into it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::bin_group::BinGroup;
use crate::bin_parms::BinParms;
use crate::collaborators::{
    save_ref_genomes, save_seed_proteins, DnaHit, GenomeSource, RefGenomeHits, SeedProteinFinder,
};
use crate::error::BinError;

/// Table of seed-protein locations saved for inspection.
pub const SEED_MAP_NAME: &str = "seeds.found.tbl";
/// Table of reference-genome assignments saved for inspection.
pub const REF_GENOME_MAP_NAME: &str = "ref.genomes.tbl";

/// Group reference-genome hits by taxon, best hit first.
///
/// Hits are ordered by score descending; equal scores are ordered by contig ID so the
/// result does not depend on the order the finder reported them in.
pub fn group_by_species(hits: &RefGenomeHits) -> BTreeMap<u32, Vec<&DnaHit>> {
    let mut species: BTreeMap<u32, Vec<&DnaHit>> = BTreeMap::new();
    for hit in hits.values() {
        species.entry(hit.taxon_id).or_default().push(hit);
    }
    for hit_list in species.values_mut() {
        hit_list.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.contig_id.cmp(&b.contig_id)));
    }

    species
}

/// Merge the contigs of each species into one starter bin.
///
/// Returns the number of starter bins created.
pub fn build_starter_bins(
    group: &mut BinGroup,
    hits: &RefGenomeHits,
    parms: &BinParms,
    genomes: &mut dyn GenomeSource,
) -> Result<usize> {
    for hit in hits.values() {
        group.count(&format!("seed-hit-{}", hit.role_id));
    }

    let mut starters = 0;
    for (taxon_id, hit_list) in group_by_species(hits) {
        let mut placed: Vec<&DnaHit> = Vec::with_capacity(hit_list.len());
        for hit in hit_list {
            if group.contig_bin(&hit.contig_id).is_some() {
                placed.push(hit);
            } else {
                warn!("Seed contig {} is not in the bin group.", hit.contig_id);
                group.count("seed-contig-missing");
            }
        }
        let Some((best, rest)) = placed.split_first() else {
            continue;
        };

        let genome = genomes.get_genome(&best.ref_id).map_err(|e| {
            BinError::Collaborator(format!("failed to fetch reference genome {}: {e:#}", best.ref_id))
        })?;
        let master_id = group
            .contig_bin_id(&best.contig_id)
            .map(str::to_string)
            .with_context(|| format!("Seed contig {} has no bin.", best.contig_id))?;
        if let Some(master) = group.bin_mut(&master_id) {
            master.set_tax_info(taxon_id, &parms.bin_name(&genome.name), &parms.name_suffix, &best.ref_id);
        }
        group.count("seed-species-found");
        starters += 1;

        for hit in rest {
            let Some(bin) = group.contig_bin(&hit.contig_id) else {
                continue;
            };
            if bin.id() != master_id {
                if bin.is_significant() {
                    warn!("Contig {} already belongs to starter bin {}.", hit.contig_id, bin.id());
                    continue;
                }
                let source_id = bin.id().to_string();
                group.merge(&master_id, &source_id)?;
                group.count("seed-contig-merged");
            }
            if let Some(master) = group.bin_mut(&master_id) {
                master.add_ref_genome(&hit.ref_id);
            }
        }

        info!(
            "{} contigs in starter bin {} using reference genome {} ({}).",
            placed.len(),
            master_id,
            genome.id,
            genome.name
        );
    }

    Ok(starters)
}

/// Run the seed-protein search on the reduced contig file and build the starter bins.
pub fn find_starter_bins(
    group: &mut BinGroup,
    reduced_file: &Path,
    out_dir: &Path,
    parms: &BinParms,
    finder: &mut dyn SeedProteinFinder,
    genomes: &mut dyn GenomeSource,
) -> Result<()> {
    info!("Searching for seed proteins in {}.", reduced_file.display());
    let seeds = finder
        .find_seed_proteins(reduced_file)
        .map_err(|e| BinError::Collaborator(format!("seed-protein search failed: {e:#}")))?;
    if seeds.is_empty() {
        warn!("No seed proteins could be found in this sample.");
        return Ok(());
    }
    group.count_by("seed-proteins-found", seeds.len() as u64);
    save_seed_proteins(&seeds, &out_dir.join(SEED_MAP_NAME))?;

    let region_count: usize = seeds.values().map(Vec::len).sum();
    info!("Searching for reference genomes for {} seed-protein regions.", region_count);
    let refs = finder
        .find_ref_genomes(&seeds, reduced_file)
        .map_err(|e| BinError::Collaborator(format!("reference-genome search failed: {e:#}")))?;
    if refs.is_empty() {
        warn!("No reference genomes could be found for this sample.");
        return Ok(());
    }
    group.count_by("seed-ref-genomes-assigned", refs.len() as u64);
    save_ref_genomes(&refs, &out_dir.join(REF_GENOME_MAP_NAME))?;

    let starters = build_starter_bins(group, &refs, parms, genomes)?;
    info!("{} starter bins created.", starters);
    Ok(())
}
