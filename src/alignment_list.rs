//! Collections of alignments.
//!
//! An [`AlignmentList`] holds the active alignments used by aggregate
//! operations, a shelf of alignments set aside by filters, and the files
//! that could not be used at all (malformed, duplicated paths, unequal
//! sequence lengths). The union of taxa and the global partition scheme are
//! rebuilt from the active set after every change.
//!
//! Every wrapper runs its operation on working copies of all active
//! alignments and swaps them in only once every copy succeeded, so an error
//! leaves the whole list untouched.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::formats::{self, ParseOptions};
use crate::model::{
    Alignment, AlignmentError, AlignmentResult, Sequence, SequenceCode, TaxaMode,
};
use crate::output::{write_haplotypes, OutputFormat, WriteOptions};
use crate::partitions::{PartitionSpan, Partitions, PartitionResult};
use crate::process::{ConsensusMode, CONSENSUS_TAXON};

/// Default name of a concatenated alignment.
pub const CONCATENATED_NAME: &str = "concatenated";

/// How [`AlignmentList::filter_by_taxa`] uses its taxa list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxaFilter {
    /// Keep alignments containing every listed taxon.
    Contain,
    /// Drop alignments containing any listed taxon.
    Exclude,
}

/// How [`AlignmentList::select_by_taxa`] matches taxon sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxaSelection {
    /// Same taxon set as the list.
    Strict,
    /// Taxon set contains the list.
    Inclusive,
    /// At least one taxon in common.
    Relaxed,
}

/// Outcome of loading a batch of files.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub bad: Vec<(PathBuf, String)>,
    pub duplicates: Vec<PathBuf>,
    pub non_alignments: Vec<String>,
}

/// Number of alignments shelved by each list filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilteredCounts {
    pub by_taxa: usize,
    pub min_taxa: usize,
    pub segregating_sites: usize,
    pub informative_sites: usize,
}

#[derive(Debug, Default)]
pub struct AlignmentList {
    alignments: Vec<Alignment>,
    shelved: Vec<Alignment>,
    /// Files that failed to parse, with the reason.
    pub bad_alignments: Vec<(PathBuf, String)>,
    /// Files given more than once.
    pub duplicate_alignments: Vec<PathBuf>,
    /// Files whose sequences have unequal lengths.
    pub non_alignments: Vec<Alignment>,
    pub filtered_counts: FilteredCounts,
    taxa_names: Vec<String>,
    sequence_code: Option<SequenceCode>,
    partitions: Partitions,
    path_list: Vec<PathBuf>,
    options: ParseOptions,
}

impl AlignmentList {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Loads every file; failures are recorded, never fatal.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], options: ParseOptions) -> Self {
        let mut list = Self::new(options);
        list.add_alignment_files(paths);
        list
    }

    pub fn from_alignments(
        alignments: Vec<Alignment>,
        options: ParseOptions,
    ) -> AlignmentResult<Self> {
        let mut list = Self::new(options);
        list.add_alignments(alignments)?;
        Ok(list)
    }

    pub fn alignments(&self) -> &[Alignment] {
        &self.alignments
    }

    pub fn shelved(&self) -> &[Alignment] {
        &self.shelved
    }

    /// Union of the active alignments' taxa, in order of first sighting.
    pub fn taxa_names(&self) -> &[String] {
        &self.taxa_names
    }

    /// Sequence code fixed by the first alignment added.
    pub fn sequence_code(&self) -> Option<SequenceCode> {
        self.sequence_code
    }

    /// Partition scheme of the concatenation of the active alignments.
    pub fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    /// Active alignment names in order.
    pub fn names(&self) -> Vec<&str> {
        self.alignments.iter().map(|a| a.name.as_str()).collect()
    }

    /// Looks an alignment up by name among active and shelved ones.
    pub fn retrieve_alignment(&self, name: &str) -> Option<&Alignment> {
        self.alignments
            .iter()
            .chain(&self.shelved)
            .find(|a| a.name == name)
    }

    fn check_sequence_type(&self, alignment: &Alignment) -> AlignmentResult<()> {
        match self.sequence_code {
            Some(code) if code.alphabet != alignment.sequence_code.alphabet => {
                Err(AlignmentError::MultipleSequenceTypes {
                    alignment: alignment.name.clone(),
                    expected: code.alphabet,
                    found: alignment.sequence_code.alphabet,
                })
            }
            _ => Ok(()),
        }
    }

    /// Adds already parsed alignments.
    ///
    /// Nothing is added if any of them has a different alphabet from the
    /// list. Non-alignments are routed to [`Self::non_alignments`].
    pub fn add_alignments(&mut self, alignments: Vec<Alignment>) -> AlignmentResult<()> {
        let mut expected = self.sequence_code;
        for alignment in alignments.iter().filter(|a| a.is_alignment) {
            match expected {
                Some(code) if code.alphabet != alignment.sequence_code.alphabet => {
                    return Err(AlignmentError::MultipleSequenceTypes {
                        alignment: alignment.name.clone(),
                        expected: code.alphabet,
                        found: alignment.sequence_code.alphabet,
                    });
                }
                None => expected = Some(alignment.sequence_code),
                _ => {}
            }
        }

        for alignment in alignments {
            if !alignment.is_alignment {
                warn!("{} is not an alignment and is set aside", alignment.name);
                self.non_alignments.push(alignment);
                continue;
            }
            if self.sequence_code.is_none() {
                self.sequence_code = Some(alignment.sequence_code);
            }
            if let Some(path) = &alignment.path {
                self.path_list.push(path.clone());
            }
            self.alignments.push(alignment);
        }
        self.refresh();
        Ok(())
    }

    /// Parses and adds files, classifying every failure.
    pub fn add_alignment_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for path in paths {
            let path: &Path = path.as_ref();
            if self.path_list.iter().any(|p| p == path) {
                debug!("Skipping duplicate file {}", path.display());
                self.duplicate_alignments.push(path.to_path_buf());
                summary.duplicates.push(path.to_path_buf());
                continue;
            }

            let alignment = match formats::parse_file(path, &self.options) {
                Ok(alignment) => alignment,
                Err(e) => {
                    warn!("Could not load {}: {}", path.display(), e);
                    self.bad_alignments.push((path.to_path_buf(), e.to_string()));
                    summary.bad.push((path.to_path_buf(), e.to_string()));
                    continue;
                }
            };
            self.path_list.push(path.to_path_buf());

            if !alignment.is_alignment {
                warn!("{} is not an alignment and is set aside", path.display());
                summary.non_alignments.push(alignment.name.clone());
                self.non_alignments.push(alignment);
                continue;
            }
            if let Err(e) = self.check_sequence_type(&alignment) {
                warn!("Could not load {}: {}", path.display(), e);
                self.bad_alignments.push((path.to_path_buf(), e.to_string()));
                summary.bad.push((path.to_path_buf(), e.to_string()));
                continue;
            }

            if self.sequence_code.is_none() {
                self.sequence_code = Some(alignment.sequence_code);
            }
            summary.loaded.push(alignment.name.clone());
            self.alignments.push(alignment);
        }
        self.refresh();

        info!(
            "Loaded {} alignment(s): {} bad, {} duplicate, {} non-alignment",
            summary.loaded.len(),
            summary.bad.len(),
            summary.duplicates.len(),
            summary.non_alignments.len()
        );
        summary
    }

    /// Drops alignments, active or shelved, for good.
    pub fn remove_file(&mut self, names: &[String]) {
        let listed: HashSet<&str> = names.iter().map(String::as_str).collect();
        let removed: Vec<PathBuf> = self
            .alignments
            .iter()
            .chain(&self.shelved)
            .filter(|a| listed.contains(a.name.as_str()))
            .filter_map(|a| a.path.clone())
            .collect();
        self.alignments.retain(|a| !listed.contains(a.name.as_str()));
        self.shelved.retain(|a| !listed.contains(a.name.as_str()));
        self.path_list.retain(|p| !removed.contains(p));
        self.refresh();
    }

    /// Moves alignments from the active set to the shelf.
    pub fn shelve(&mut self, names: &[String]) {
        let listed: HashSet<&str> = names.iter().map(String::as_str).collect();
        let (moved, kept): (Vec<Alignment>, Vec<Alignment>) = std::mem::take(&mut self.alignments)
            .into_iter()
            .partition(|a| listed.contains(a.name.as_str()));
        self.alignments = kept;
        self.shelved.extend(moved);
        self.refresh();
    }

    /// Moves alignments from the shelf back to the active set.
    pub fn activate(&mut self, names: &[String]) {
        let listed: HashSet<&str> = names.iter().map(String::as_str).collect();
        let (moved, kept): (Vec<Alignment>, Vec<Alignment>) = std::mem::take(&mut self.shelved)
            .into_iter()
            .partition(|a| listed.contains(a.name.as_str()));
        self.shelved = kept;
        self.alignments.extend(moved);
        self.refresh();
    }

    fn refresh(&mut self) {
        self.rebuild_taxa_names();
        if let Err(e) = self.rebuild_partitions() {
            warn!("Could not rebuild the partition scheme: {}", e);
        }
    }

    fn rebuild_taxa_names(&mut self) {
        let mut seen = HashSet::new();
        self.taxa_names = self
            .alignments
            .iter()
            .flat_map(|a| a.taxa())
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();
    }

    /// One partition per single-partition alignment; the sub-partitions of
    /// multi-partition alignments, shifted to their offset.
    fn rebuild_partitions(&mut self) -> PartitionResult<()> {
        let mut partitions = Partitions::new();
        for alignment in self.alignments.iter().filter(|a| a.locus_length() > 0) {
            let offset = partitions.counter();
            let own = alignment.partitions();
            if !own.is_single() && own.validate(alignment.locus_length()).is_ok() {
                let mut shifted = own.clone();
                for name in shifted.names() {
                    if let Some(partition) = shifted.get_mut(&name) {
                        partition.source = Some(alignment.name.clone());
                    }
                }
                partitions.merge(&shifted, offset)?;
            } else {
                if !own.is_single() {
                    debug!(
                        "{}: partitions do not cover the alignment, using a single partition",
                        alignment.name
                    );
                }
                let models = own.iter().next().map(|p| p.models.clone()).unwrap_or_default();
                let partition = partitions.add_partition(
                    &alignment.name,
                    PartitionSpan::Length(alignment.locus_length()),
                )?;
                partition.models = models;
                partition.source = Some(alignment.name.clone());
            }
        }
        self.partitions = partitions;
        Ok(())
    }

    /// Concatenates the active alignments into one.
    ///
    /// Taxa missing from an alignment are filled with that alignment's
    /// missing-data symbol. The result carries the list's partition scheme.
    pub fn concatenate(&self, name: &str) -> AlignmentResult<Alignment> {
        let first = self.alignments.first().ok_or_else(|| {
            AlignmentError::EmptyAlignment("no active alignment to concatenate".to_string())
        })?;
        let code = self.sequence_code.unwrap_or(first.sequence_code);
        let total: usize = self.alignments.iter().map(Alignment::locus_length).sum();

        let mut store = self.options.storage.create_store();
        for taxon in &self.taxa_names {
            let mut sequence = String::with_capacity(total);
            for alignment in &self.alignments {
                if alignment.contains_taxon(taxon) {
                    sequence.push_str(&alignment.sequence(taxon)?);
                } else {
                    let missing = alignment.sequence_code.missing;
                    sequence.extend(std::iter::repeat(missing).take(alignment.locus_length()));
                }
            }
            store.put(taxon, &sequence)?;
        }

        let mut concatenated =
            Alignment::from_sequences(name, Vec::new(), code, &self.options.storage)?;
        concatenated.replace_contents(self.taxa_names.clone(), store, total);
        concatenated.set_partitions(self.partitions.clone())?;
        info!(
            "Concatenated {} alignment(s) into {}: {} taxa, {} sites",
            self.alignments.len(),
            name,
            self.taxa_names.len(),
            total
        );
        Ok(concatenated)
    }

    /// Splits the single active alignment into one alignment per partition.
    ///
    /// Uses `partitions` when given, the alignment's own scheme otherwise.
    /// Taxa with only missing data in a partition are left out of it, and
    /// partitions left without taxa are skipped.
    pub fn reverse_concatenate(
        &self,
        partitions: Option<&Partitions>,
    ) -> AlignmentResult<AlignmentList> {
        let [source] = self.alignments.as_slice() else {
            return Err(AlignmentError::ReverseConcatenation(self.alignments.len()));
        };
        let partitions = partitions.unwrap_or(source.partitions());
        partitions.validate(source.data_length())?;

        let missing = source.sequence_code.missing as u8;
        let rows = source.load_rows()?;

        let mut list = AlignmentList::new(self.options.clone());
        list.sequence_code = Some(source.sequence_code);
        for partition in partitions.iter() {
            let sequences: Vec<Sequence> = source
                .taxa()
                .iter()
                .zip(&rows)
                .filter_map(|(taxon, row)| {
                    let slice = row.get(partition.start..=partition.end)?;
                    if slice.iter().all(|&b| b == missing) {
                        return None;
                    }
                    Some(Sequence::new(taxon.as_str(), String::from_utf8_lossy(slice)))
                })
                .collect();
            if sequences.is_empty() {
                debug!("Partition {} has no data and is skipped", partition.name);
                continue;
            }

            let mut alignment = Alignment::from_sequences(
                &partition.name,
                sequences,
                source.sequence_code,
                &self.options.storage,
            )?;
            if let Some(own) = alignment.partitions_mut().get_mut(&partition.name) {
                own.models = partition.models.clone();
                own.codon_positions = partition.codon_positions.clone();
            }
            list.alignments.push(alignment);
        }
        list.refresh();
        debug!("Split {} into {} alignment(s)", source.name, list.len());
        Ok(list)
    }

    /// Shelves alignments by taxon content.
    ///
    /// Fails with [`AlignmentError::EmptyAlignment`], changing nothing, when
    /// no alignment would remain.
    pub fn filter_by_taxa(&mut self, taxa: &[String], mode: TaxaFilter) -> AlignmentResult<()> {
        let failing: Vec<String> = self
            .alignments
            .iter()
            .filter(|a| match mode {
                TaxaFilter::Contain => !taxa.iter().all(|t| a.contains_taxon(t)),
                TaxaFilter::Exclude => taxa.iter().any(|t| a.contains_taxon(t)),
            })
            .map(|a| a.name.clone())
            .collect();
        if failing.len() == self.alignments.len() {
            return Err(AlignmentError::EmptyAlignment(
                "no alignment passes the taxa filter".to_string(),
            ));
        }
        self.filtered_counts.by_taxa += failing.len();
        self.shelve(&failing);
        Ok(())
    }

    /// Shelves alignments with fewer than `min_percent`% of all taxa.
    pub fn filter_min_taxa(&mut self, min_percent: f64) {
        let threshold = min_percent / 100.0 * self.taxa_names.len() as f64;
        let failing: Vec<String> = self
            .alignments
            .iter()
            .filter(|a| (a.taxa_count() as f64) < threshold)
            .map(|a| a.name.clone())
            .collect();
        self.filtered_counts.min_taxa += failing.len();
        self.shelve(&failing);
    }

    /// Keeps the enabled codon positions in every active alignment and
    /// rebuilds the partition scheme.
    pub fn filter_codon_positions(&mut self, keep: [bool; 3]) -> AlignmentResult<()> {
        self.apply_staged(|alignment| alignment.filter_codon_positions(keep))?;
        self.refresh();
        Ok(())
    }

    /// Runs `op` on a copy of every active alignment, then replaces the
    /// active set with the copies. Nothing changes if any call fails.
    fn apply_staged<T, F>(&mut self, mut op: F) -> AlignmentResult<Vec<T>>
    where
        F: FnMut(&mut Alignment) -> AlignmentResult<T>,
    {
        let mut staged = Vec::with_capacity(self.alignments.len());
        let mut outputs = Vec::with_capacity(self.alignments.len());
        for alignment in &self.alignments {
            let mut copy = alignment.try_clone()?;
            outputs.push(op(&mut copy)?);
            staged.push(copy);
        }
        self.alignments = staged;
        Ok(outputs)
    }

    fn filter_by_count<F>(
        &mut self,
        min: Option<usize>,
        max: Option<usize>,
        count: F,
    ) -> AlignmentResult<usize>
    where
        F: Fn(&Alignment) -> AlignmentResult<usize>,
    {
        let mut failing = Vec::new();
        for alignment in &self.alignments {
            let n = count(alignment)?;
            if min.map_or(false, |min| n < min) || max.map_or(false, |max| n > max) {
                failing.push(alignment.name.clone());
            }
        }
        self.shelve(&failing);
        Ok(failing.len())
    }

    /// Shelves alignments whose segregating site count is outside `[min, max]`.
    pub fn filter_segregating_sites(
        &mut self,
        min: Option<usize>,
        max: Option<usize>,
    ) -> AlignmentResult<()> {
        let shelved = self.filter_by_count(min, max, Alignment::count_segregating_sites)?;
        self.filtered_counts.segregating_sites += shelved;
        Ok(())
    }

    /// Shelves alignments whose informative site count is outside `[min, max]`.
    pub fn filter_informative_sites(
        &mut self,
        min: Option<usize>,
        max: Option<usize>,
    ) -> AlignmentResult<()> {
        let shelved = self.filter_by_count(min, max, Alignment::count_informative_sites)?;
        self.filtered_counts.informative_sites += shelved;
        Ok(())
    }

    /// Active alignments whose taxa match `taxa` under `mode`.
    pub fn select_by_taxa(&self, taxa: &[String], mode: TaxaSelection) -> Vec<&Alignment> {
        let listed: HashSet<&str> = taxa.iter().map(String::as_str).collect();
        self.alignments
            .iter()
            .filter(|a| {
                let own: HashSet<&str> = a.taxa().iter().map(String::as_str).collect();
                match mode {
                    TaxaSelection::Strict => own == listed,
                    TaxaSelection::Inclusive => own.is_superset(&listed),
                    TaxaSelection::Relaxed => !own.is_disjoint(&listed),
                }
            })
            .collect()
    }

    /// Removes (or keeps only) the listed taxa in every active alignment.
    ///
    /// Alignments left without taxa are dropped from the list.
    pub fn remove_taxa(&mut self, names: &[String], mode: TaxaMode) -> AlignmentResult<()> {
        self.apply_staged(|alignment| match mode {
            TaxaMode::Remove => {
                let present: Vec<String> = names
                    .iter()
                    .filter(|n| alignment.contains_taxon(n))
                    .cloned()
                    .collect();
                alignment.remove_taxa(&present, mode)
            }
            TaxaMode::Inverse => alignment.remove_taxa(names, mode),
        })?;

        let (emptied, kept): (Vec<Alignment>, Vec<Alignment>) =
            std::mem::take(&mut self.alignments)
                .into_iter()
                .partition(Alignment::is_empty);
        self.alignments = kept;
        for alignment in &emptied {
            info!("Alignment {} has no taxa left and was removed", alignment.name);
        }
        self.refresh();
        Ok(())
    }

    /// Renames a taxon in every active alignment that has it.
    pub fn change_taxon_name(&mut self, old: &str, new: &str) -> AlignmentResult<()> {
        if !self.taxa_names.iter().any(|t| t == old) {
            return Err(AlignmentError::UnknownTaxon {
                alignment: "alignment list".to_string(),
                taxon: old.to_string(),
            });
        }
        self.apply_staged(|alignment| {
            if alignment.contains_taxon(old) {
                alignment.change_taxon_name(old, new)?;
            }
            Ok(())
        })?;
        self.rebuild_taxa_names();
        Ok(())
    }

    pub fn filter_missing_data(
        &mut self,
        gap_threshold: f64,
        missing_threshold: f64,
    ) -> AlignmentResult<()> {
        self.apply_staged(|alignment| {
            alignment.filter_missing_data(gap_threshold, missing_threshold)
        })?;
        self.refresh();
        Ok(())
    }

    pub fn code_gaps(&mut self) -> AlignmentResult<()> {
        self.apply_staged(Alignment::code_gaps)?;
        self.refresh();
        Ok(())
    }

    /// Collapses every active alignment. With `haplotype_dir`, writes one
    /// `NAME.haplotypes` correspondence file per alignment there.
    pub fn collapse(&mut self, prefix: &str, haplotype_dir: Option<&Path>) -> AlignmentResult<()> {
        let haplotypes = self.apply_staged(|alignment| alignment.collapse(prefix))?;
        self.rebuild_taxa_names();
        if let Some(dir) = haplotype_dir {
            for (alignment, groups) in self.alignments.iter().zip(&haplotypes) {
                write_haplotypes(groups, dir.join(format!("{}.haplotypes", alignment.name)))?;
            }
        }
        Ok(())
    }

    /// Reduces every active alignment to its consensus.
    ///
    /// With `single_file`, the list is left unchanged and one alignment is
    /// returned with a consensus row per source alignment, named after it.
    pub fn consensus(
        &mut self,
        mode: ConsensusMode,
        single_file: bool,
    ) -> AlignmentResult<Option<Alignment>> {
        if !single_file {
            self.apply_staged(|alignment| alignment.consensus(mode))?;
            self.refresh();
            return Ok(None);
        }

        let mut sequences = Vec::with_capacity(self.alignments.len());
        for alignment in &self.alignments {
            let mut copy = alignment.try_clone()?;
            copy.consensus(mode)?;
            let data = copy.sequence(CONSENSUS_TAXON)?;
            sequences.push(Sequence::new(alignment.name.as_str(), data));
        }
        let code = self
            .sequence_code
            .ok_or_else(|| AlignmentError::EmptyAlignment("no active alignment".to_string()))?;
        let consensus =
            Alignment::from_sequences(CONSENSUS_TAXON, sequences, code, &self.options.storage)?;
        Ok(Some(consensus))
    }

    /// Writes every active alignment to `output_dir`, named `NAME{suffix}`
    /// plus the format extension.
    pub fn write_to_file(
        &self,
        formats: &[OutputFormat],
        output_dir: &Path,
        suffix: &str,
        options: &WriteOptions,
    ) -> AlignmentResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for alignment in &self.alignments {
            let stem = output_dir.join(format!("{}{}", alignment.name, suffix));
            written.extend(alignment.write_to_file(formats, &stem, options)?);
        }
        Ok(written)
    }

    /// Writes the taxa of the active alignments, one per line.
    pub fn write_taxa_to_file<P: AsRef<Path>>(&self, path: P) -> AlignmentResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for taxon in &self.taxa_names {
            writeln!(out, "{}", taxon)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Drops every alignment and record, releasing their stores.
    pub fn clear(&mut self) {
        let options = std::mem::take(&mut self.options);
        *self = Self::new(options);
    }
}
