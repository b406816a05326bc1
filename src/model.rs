//! Data model for alignments.
//!
//! This module contains the structures shared by every other part of the
//! crate:
//! - [`SequenceCode`]: alphabet plus missing-data symbol
//! - [`Sequence`]: a named raw record, as produced by the parsers
//! - [`Alignment`]: one locus, its taxa, partitions and flags
//!
//! Sequence data is stored lowercase behind a [`SequenceStore`]; writers
//! upper-case it on output.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::PathBuf;

use log::warn;
use thiserror::Error;

use crate::formats::FileFormat;
use crate::partitions::{PartitionError, Partitions};
use crate::store::{SequenceStore, StorageBackend, StoreError};

/// Alignment gap symbol. Always distinct from the missing-data symbol.
pub const GAP: char = '-';

/// Characters stripped from taxon names.
pub const ILLEGAL_CHARS: [char; 9] = [':', ',', ')', '(', ';', '[', ']', '\'', '"'];

/// Molecular alphabet of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alphabet {
    Dna,
    Protein,
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alphabet::Dna => write!(f, "DNA"),
            Alphabet::Protein => write!(f, "Protein"),
        }
    }
}

/// Alphabet and missing-data symbol of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCode {
    pub alphabet: Alphabet,
    pub missing: char,
}

impl SequenceCode {
    pub fn dna() -> Self {
        Self {
            alphabet: Alphabet::Dna,
            missing: 'n',
        }
    }

    pub fn protein() -> Self {
        Self {
            alphabet: Alphabet::Protein,
            missing: 'x',
        }
    }

    pub fn with_missing(self, missing: char) -> Self {
        Self {
            missing: missing.to_ascii_lowercase(),
            ..self
        }
    }

    /// Guesses the code from one representative sequence.
    ///
    /// DNA when more than 90% of the gap-stripped residues are A, T, G, C or
    /// N. The missing symbol is `?` when the sample contains one, otherwise
    /// `n` (DNA) or `x` (protein). Returns `None` for an empty or all-gap
    /// sample.
    pub fn guess(sample: &str) -> Option<Self> {
        let residues: Vec<u8> = sample
            .bytes()
            .filter(|b| *b != GAP as u8 && !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_uppercase())
            .collect();
        if residues.is_empty() {
            return None;
        }

        let dna = residues
            .iter()
            .filter(|b| matches!(b, b'A' | b'T' | b'G' | b'C' | b'N'))
            .count();
        let code = if dna as f64 / residues.len() as f64 > 0.9 {
            Self::dna()
        } else {
            Self::protein()
        };

        if residues.contains(&b'?') {
            Some(code.with_missing('?'))
        } else {
            Some(code)
        }
    }

    /// RAxML model used when a partition declares none.
    pub fn default_model(&self) -> &'static str {
        match self.alphabet {
            Alphabet::Dna => "GTR",
            Alphabet::Protein => "LG",
        }
    }
}

/// Removes characters that would break downstream formats from a taxon name.
pub fn clean_taxon_name(name: &str) -> String {
    name.chars().filter(|c| !ILLEGAL_CHARS.contains(c)).collect()
}

/// A named sequence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub id: String,
    pub data: String,
}

impl Sequence {
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Errors raised by alignment operations.
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Alignment '{alignment}' contains duplicate taxa: {}", .taxa.join(", "))]
    DuplicateTaxon { alignment: String, taxa: Vec<String> },

    #[error("Taxon '{taxon}' not found in alignment '{alignment}'")]
    UnknownTaxon { alignment: String, taxon: String },

    #[error("Taxon '{taxon}' already exists in alignment '{alignment}'")]
    TaxonExists { alignment: String, taxon: String },

    #[error("'{0}' is not an alignment (sequences of unequal length)")]
    NotAnAlignment(String),

    #[error("Output format error: {0}")]
    OutputFormat(String),

    #[error("Empty alignment: {0}")]
    EmptyAlignment(String),

    #[error("Alignment '{alignment}' contains {found} sequences but the dataset is {expected}")]
    MultipleSequenceTypes {
        alignment: String,
        expected: Alphabet,
        found: Alphabet,
    },

    #[error("Reverse concatenation needs exactly one active alignment, found {0}")]
    ReverseConcatenation(usize),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for alignment operations.
pub type AlignmentResult<T> = Result<T, AlignmentError>;

/// How a taxa list is applied when removing taxa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxaMode {
    /// Drop the listed taxa.
    Remove,
    /// Keep only the listed taxa.
    Inverse,
}

/// One locus: ordered taxa, their sequences, partitions and status flags.
#[derive(Debug)]
pub struct Alignment {
    /// Alignment name, the input file stem for parsed files.
    pub name: String,
    /// Input path, if the alignment was read from disk.
    pub path: Option<PathBuf>,
    /// Format the alignment was parsed from.
    pub input_format: Option<FileFormat>,
    pub sequence_code: SequenceCode,
    /// False when the records have unequal lengths.
    pub is_alignment: bool,
    /// Why `is_alignment` is false.
    pub warning: Option<String>,
    /// Site range (0-based, inclusive) of the binary gap-coding block.
    pub restriction_range: Option<(usize, usize)>,
    locus_length: usize,
    partitions: Partitions,
    taxa: Vec<String>,
    store: Box<dyn SequenceStore>,
    backend: StorageBackend,
}

impl Alignment {
    /// Builds an alignment from raw records.
    ///
    /// Taxon names must already be cleaned. Duplicated names are fatal;
    /// unequal lengths only clear `is_alignment`.
    pub fn from_sequences(
        name: &str,
        sequences: Vec<Sequence>,
        sequence_code: SequenceCode,
        backend: &StorageBackend,
    ) -> AlignmentResult<Self> {
        let duplicates = find_duplicates(sequences.iter().map(|s| s.id.as_str()));
        if !duplicates.is_empty() {
            return Err(AlignmentError::DuplicateTaxon {
                alignment: name.to_string(),
                taxa: duplicates,
            });
        }

        let (is_alignment, locus_length, warning) = Self::validate_lengths(&sequences);
        if let Some(message) = &warning {
            warn!("{}: {}", name, message);
        }

        let mut store = backend.create_store();
        let mut taxa = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            store.put(&sequence.id, &sequence.data)?;
            taxa.push(sequence.id);
        }

        Ok(Self {
            name: name.to_string(),
            path: None,
            input_format: None,
            sequence_code,
            is_alignment,
            warning,
            restriction_range: None,
            locus_length,
            partitions: Partitions::single(name, locus_length),
            taxa,
            store,
            backend: backend.clone(),
        })
    }

    /// Checks that all records have the first record's length.
    fn validate_lengths(sequences: &[Sequence]) -> (bool, usize, Option<String>) {
        let Some(first) = sequences.first() else {
            return (true, 0, None);
        };
        let first_len = first.len();
        if sequences.iter().all(|s| s.len() == first_len) {
            return (true, first_len, None);
        }

        let min_len = sequences.iter().map(Sequence::len).min().unwrap_or(0);
        let max_len = sequences.iter().map(Sequence::len).max().unwrap_or(0);
        let warning = format!(
            "Sequences have different lengths (min: {}, max: {}). Not a valid alignment.",
            min_len, max_len
        );
        (false, first_len, Some(warning))
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn taxa_count(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn contains_taxon(&self, taxon: &str) -> bool {
        self.store.contains(taxon)
    }

    /// Total number of sites, including any gap-coding block.
    pub fn locus_length(&self) -> usize {
        self.locus_length
    }

    /// Number of sequence sites, i.e. sites before the gap-coding block.
    pub fn data_length(&self) -> usize {
        match self.restriction_range {
            Some((start, _)) => start,
            None => self.locus_length,
        }
    }

    pub fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    /// Replaces the partition scheme after checking it covers every site.
    pub fn set_partitions(&mut self, partitions: Partitions) -> AlignmentResult<()> {
        partitions.validate(self.data_length())?;
        self.partitions = partitions;
        Ok(())
    }

    /// Replaces the partition scheme without checking it.
    pub(crate) fn set_partitions_unchecked(&mut self, partitions: Partitions) {
        self.partitions = partitions;
    }

    /// Partition metadata (names, models) edits that keep the ranges intact.
    pub(crate) fn partitions_mut(&mut self) -> &mut Partitions {
        &mut self.partitions
    }

    /// Sequence of `taxon`.
    pub fn sequence(&self, taxon: &str) -> AlignmentResult<String> {
        if !self.store.contains(taxon) {
            return Err(AlignmentError::UnknownTaxon {
                alignment: self.name.clone(),
                taxon: taxon.to_string(),
            });
        }
        Ok(self.store.get(taxon)?)
    }

    /// Iterates `(taxon, sequence)` pairs in taxon order.
    pub fn sequences(&self) -> impl Iterator<Item = AlignmentResult<(&str, String)>> + '_ {
        self.taxa
            .iter()
            .map(move |taxon| {
                self.store
                    .get(taxon)
                    .map(|data| (taxon.as_str(), data))
                    .map_err(AlignmentError::from)
            })
    }

    /// Loads every sequence as bytes, in taxon order.
    pub(crate) fn load_rows(&self) -> AlignmentResult<Vec<Vec<u8>>> {
        self.taxa
            .iter()
            .map(|taxon| {
                self.store
                    .get(taxon)
                    .map(String::into_bytes)
                    .map_err(AlignmentError::from)
            })
            .collect()
    }

    /// Writes `rows` into a fresh store of this alignment's backend.
    pub(crate) fn build_store<'a, I>(&self, rows: I) -> AlignmentResult<Box<dyn SequenceStore>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut store = self.backend.create_store();
        for (taxon, data) in rows {
            store.put(taxon, data)?;
        }
        Ok(store)
    }

    /// Swaps in a fully built working copy.
    pub(crate) fn replace_contents(
        &mut self,
        taxa: Vec<String>,
        store: Box<dyn SequenceStore>,
        locus_length: usize,
    ) {
        self.taxa = taxa;
        self.store = store;
        self.locus_length = locus_length;
    }

    /// Independent copy with its own backing store.
    pub fn try_clone(&self) -> AlignmentResult<Self> {
        Ok(Self {
            name: self.name.clone(),
            path: self.path.clone(),
            input_format: self.input_format,
            sequence_code: self.sequence_code,
            is_alignment: self.is_alignment,
            warning: self.warning.clone(),
            restriction_range: self.restriction_range,
            locus_length: self.locus_length,
            partitions: self.partitions.clone(),
            taxa: self.taxa.clone(),
            store: self.store.fork()?,
            backend: self.backend.clone(),
        })
    }

    /// Removes (or, in [`TaxaMode::Inverse`], keeps only) the listed taxa.
    pub fn remove_taxa(&mut self, names: &[String], mode: TaxaMode) -> AlignmentResult<()> {
        let listed: HashSet<&str> = names.iter().map(String::as_str).collect();
        if mode == TaxaMode::Remove {
            for name in names.iter().filter(|n| !self.store.contains(n)) {
                warn!("Taxon '{}' is not in alignment '{}'", name, self.name);
            }
        }

        let (kept, dropped): (Vec<String>, Vec<String>) = self
            .taxa
            .iter()
            .cloned()
            .partition(|taxon| listed.contains(taxon.as_str()) == (mode == TaxaMode::Inverse));
        if dropped.is_empty() {
            return Ok(());
        }

        let mut working = self.store.fork()?;
        for taxon in &dropped {
            working.remove(taxon)?;
        }
        let locus_length = self.locus_length;
        self.replace_contents(kept, working, locus_length);
        Ok(())
    }

    /// Renames one taxon. The new name is cleaned of illegal characters.
    pub fn change_taxon_name(&mut self, old: &str, new: &str) -> AlignmentResult<()> {
        let new = clean_taxon_name(new);
        let index = self
            .taxa
            .iter()
            .position(|t| t == old)
            .ok_or_else(|| AlignmentError::UnknownTaxon {
                alignment: self.name.clone(),
                taxon: old.to_string(),
            })?;
        if self.store.contains(&new) {
            return Err(AlignmentError::TaxonExists {
                alignment: self.name.clone(),
                taxon: new,
            });
        }

        let mut working = self.store.fork()?;
        let data = working.get(old)?;
        working.remove(old)?;
        working.put(&new, &data)?;

        let mut taxa = self.taxa.clone();
        taxa[index] = new;
        let locus_length = self.locus_length;
        self.replace_contents(taxa, working, locus_length);
        Ok(())
    }
}

/// Names that occur more than once, each reported once in order of first repeat.
pub(crate) fn find_duplicates<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for name in names {
        if !seen.insert(name) && reported.insert(name) {
            duplicates.push(name.to_string());
        }
    }
    duplicates
}
