//! Multi-format alignment reader.
//!
//! Supports content-based detection for:
//! - FASTA (first line starts with `>`)
//! - NEXUS (first line is `#NEXUS`, any case)
//! - PHYLIP (first line holds two integers, sequential layout only)
//! - loci (pyRAD-style `>TAXON SEQUENCE` one-liners, blocks closed by `//`)
//!
//! Format priority:
//! 1. Explicit format in [`ParseOptions`]
//! 2. Content-based detection
//!
//! Every parser turns text into [`ParsedRecords`]; the steps shared by all
//! formats (taxon name cleaning, duplicate detection, length validation,
//! partition checks) then happen once in [`parse_content`].

pub mod fasta;
pub mod loci;
pub mod nexus;
pub mod phylip;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

use crate::model::{
    clean_taxon_name, find_duplicates, Alignment, AlignmentError, Sequence, SequenceCode,
};
use crate::partitions::{PartitionError, Partitions};
use crate::store::StorageBackend;

/// Detected file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Fasta,
    Phylip,
    Nexus,
    Loci,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Fasta => write!(f, "FASTA"),
            FileFormat::Phylip => write!(f, "PHYLIP"),
            FileFormat::Nexus => write!(f, "NEXUS"),
            FileFormat::Loci => write!(f, "loci"),
        }
    }
}

/// Errors that can occur during file parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to open file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Empty file")]
    EmptyFile,

    #[error("Could not determine the format of '{0}' (expected FASTA, NEXUS, PHYLIP or loci)")]
    UnknownFormat(String),

    #[error("Empty sequence in '{file}': {detail}")]
    EmptySequence { file: String, detail: String },

    #[error("File '{file}' contains duplicate taxa: {}", .taxa.join(", "))]
    DuplicateTaxon { file: String, taxa: Vec<String> },

    #[error("Invalid partitions in '{file}': {source}")]
    Partition { file: String, source: PartitionError },

    #[error("{0}")]
    Alignment(#[from] AlignmentError),

    #[error("FASTA error: {0}")]
    FastaError(#[from] fasta::FastaError),

    #[error("PHYLIP error: {0}")]
    PhylipError(#[from] phylip::PhylipError),

    #[error("NEXUS error: {0}")]
    NexusError(#[from] nexus::NexusError),

    #[error("loci error: {0}")]
    LociError(#[from] loci::LociError),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Raw output of a format parser, before the shared post-parse steps.
#[derive(Debug, Default)]
pub struct ParsedRecords {
    pub sequences: Vec<Sequence>,
    /// Partition scheme declared by the file, if any.
    pub partitions: Option<Partitions>,
    /// Missing-data symbol declared by the file, if any.
    pub missing: Option<char>,
    /// Sequence length declared by a header, if any.
    pub declared_length: Option<usize>,
    /// Models for the whole alignment when no partitions are declared.
    pub models: Vec<String>,
}

/// Reader configuration.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Skip content detection and use this format.
    pub format: Option<FileFormat>,
    /// Skip alphabet guessing and use this code.
    pub sequence_code: Option<SequenceCode>,
    /// Where sequence data of the parsed alignments is kept.
    pub storage: StorageBackend,
}

fn non_blank_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Detects the file format by examining the first non-blank lines.
pub fn detect_format_from_content(content: &str) -> Option<FileFormat> {
    let mut lines = non_blank_lines(content);
    let first = lines.next()?;

    // NEXUS: starts with #NEXUS (case-insensitive)
    if first.to_uppercase().starts_with("#NEXUS") {
        return Some(FileFormat::Nexus);
    }

    // '>' lines: loci files keep name and sequence on the same line
    if first.starts_with('>') {
        let one_liner = first.split_whitespace().count() >= 2;
        let next_is_record = lines.next().is_some_and(|line| line.starts_with('>'));
        if one_liner && next_is_record {
            return Some(FileFormat::Loci);
        }
        return Some(FileFormat::Fasta);
    }

    // PHYLIP: first line is "ntax nchar" (two positive integers)
    let parts: Vec<&str> = first.split_whitespace().collect();
    if parts.len() == 2 && parts.iter().all(|p| p.parse::<usize>().is_ok_and(|n| n > 0)) {
        return Some(FileFormat::Phylip);
    }

    None
}

/// Extracts one representative sequence for alphabet guessing.
fn sample_sequence(content: &str, format: FileFormat) -> Option<String> {
    let mut lines = non_blank_lines(content);
    match format {
        FileFormat::Fasta => {
            lines.find(|line| line.starts_with('>'))?;
            Some(lines.take_while(|line| !line.starts_with('>')).collect())
        }
        FileFormat::Loci => {
            let first = lines.find(|line| line.starts_with('>'))?;
            first.split_whitespace().last().map(str::to_string)
        }
        FileFormat::Phylip => {
            lines.next()?;
            let row = lines.next()?;
            Some(row.split_whitespace().skip(1).collect())
        }
        FileFormat::Nexus => {
            lines.find(|line| line.to_lowercase().starts_with("matrix"))?;
            let row = lines.find(|line| !line.starts_with('['))?;
            Some(row.trim_end_matches(';').split_whitespace().skip(1).collect())
        }
    }
}

/// Detects format and sequence code from file content.
pub fn sniff(content: &str, file: &str) -> ParseResult<(FileFormat, SequenceCode)> {
    let format = detect_format_from_content(content)
        .ok_or_else(|| ParseError::UnknownFormat(file.to_string()))?;
    let code = guess_code(content, format, file)?;
    Ok((format, code))
}

fn guess_code(content: &str, format: FileFormat, file: &str) -> ParseResult<SequenceCode> {
    sample_sequence(content, format)
        .and_then(|sample| SequenceCode::guess(&sample))
        .ok_or_else(|| ParseError::EmptySequence {
            file: file.to_string(),
            detail: "the first sequence has no residues".to_string(),
        })
}

fn read_content<P: AsRef<Path>>(path: P) -> ParseResult<String> {
    let file = File::open(&path)?;
    let file_size = file.metadata()?.len() as usize;
    if file_size == 0 {
        return Err(ParseError::EmptyFile);
    }

    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut content = String::with_capacity(file_size);
    reader.read_to_string(&mut content)?;
    Ok(content)
}

/// Detects the format and sequence code of a file.
pub fn detect<P: AsRef<Path>>(path: P) -> ParseResult<(FileFormat, SequenceCode)> {
    let content = read_content(&path)?;
    sniff(&content, &path.as_ref().display().to_string())
}

/// Parses in-memory content into an alignment called `name`.
pub fn parse_content(content: &str, name: &str, options: &ParseOptions) -> ParseResult<Alignment> {
    let format = match options.format {
        Some(format) => format,
        None => detect_format_from_content(content)
            .ok_or_else(|| ParseError::UnknownFormat(name.to_string()))?,
    };
    let code = match options.sequence_code {
        Some(code) => code,
        None => guess_code(content, format, name)?,
    };

    let parsed = match format {
        FileFormat::Fasta => fasta::parse_fasta_str(content)?,
        FileFormat::Phylip => phylip::parse_phylip_str(content)?,
        FileFormat::Nexus => nexus::parse_nexus_str(content)?,
        FileFormat::Loci => loci::parse_loci_str(content, code.missing).map_err(|e| match e {
            loci::LociError::DuplicateTaxon { taxon, .. } => ParseError::DuplicateTaxon {
                file: name.to_string(),
                taxa: vec![taxon],
            },
            other => ParseError::LociError(other),
        })?,
    };
    let code = match (parsed.missing, options.sequence_code) {
        (Some(missing), None) => code.with_missing(missing),
        _ => code,
    };

    let mut alignment = build_alignment(parsed.sequences, name, code, &options.storage)?;
    alignment.input_format = Some(format);

    if let Some(declared) = parsed.declared_length {
        if alignment.is_alignment && declared != alignment.locus_length() {
            let message = format!(
                "Header declares {} sites but sequences have {}",
                declared,
                alignment.locus_length()
            );
            warn!("{}: {}", name, message);
            alignment.is_alignment = false;
            alignment.warning = Some(message);
        }
    }

    if let Some(partitions) = parsed.partitions {
        if alignment.is_alignment {
            alignment.set_partitions(partitions).map_err(|e| match e {
                AlignmentError::Partition(source) => ParseError::Partition {
                    file: name.to_string(),
                    source,
                },
                other => ParseError::Alignment(other),
            })?;
        }
    } else if !parsed.models.is_empty() {
        if let Some(partition) = alignment.partitions_mut().get_mut(name) {
            partition.models = parsed.models;
        }
    }

    debug!(
        "Parsed {} as {} {}: {} taxa, {} sites, {} partition(s)",
        name,
        format,
        code.alphabet,
        alignment.taxa_count(),
        alignment.locus_length(),
        alignment.partitions().len()
    );
    Ok(alignment)
}

/// Shared post-parse steps: name cleaning, case folding, empty and duplicate checks.
fn build_alignment(
    sequences: Vec<Sequence>,
    name: &str,
    code: SequenceCode,
    storage: &StorageBackend,
) -> ParseResult<Alignment> {
    let mut cleaned = Vec::with_capacity(sequences.len());
    for sequence in sequences {
        let id = clean_taxon_name(&sequence.id);
        if sequence.data.is_empty() {
            return Err(ParseError::EmptySequence {
                file: name.to_string(),
                detail: format!("taxon '{}' has no sequence data", id),
            });
        }
        cleaned.push(Sequence::new(id, sequence.data.to_lowercase()));
    }

    let duplicates = find_duplicates(cleaned.iter().map(|s| s.id.as_str()));
    if !duplicates.is_empty() {
        return Err(ParseError::DuplicateTaxon {
            file: name.to_string(),
            taxa: duplicates,
        });
    }

    Ok(Alignment::from_sequences(name, cleaned, code, storage)?)
}

/// Parses a sequence file. The alignment is named after the file stem.
///
/// This is a pure function of the file content and the options, safe to
/// call from several threads at once.
pub fn parse_file<P: AsRef<Path>>(path: P, options: &ParseOptions) -> ParseResult<Alignment> {
    let path = path.as_ref();
    let content = read_content(path)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut alignment = parse_content(&content, &name, options)?;
    alignment.path = Some(path.to_path_buf());
    Ok(alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Alphabet;

    #[test]
    fn test_detect_fasta() {
        let content = ">seq1\nACGT\n";
        assert_eq!(detect_format_from_content(content), Some(FileFormat::Fasta));
    }

    #[test]
    fn test_detect_phylip() {
        assert_eq!(detect_format_from_content("10 500\n"), Some(FileFormat::Phylip));
        let content = "  3   10\nseq1      ACGTACGTAC\n";
        assert_eq!(detect_format_from_content(content), Some(FileFormat::Phylip));
        assert_eq!(detect_format_from_content("0 0\n"), None);
        assert_eq!(detect_format_from_content("3 0\n"), None);
    }

    #[test]
    fn test_detect_nexus() {
        let content = "#NEXUS\nBEGIN DATA;\n";
        assert_eq!(detect_format_from_content(content), Some(FileFormat::Nexus));

        // Case insensitive
        let content2 = "#nexus\nbegin data;\n";
        assert_eq!(detect_format_from_content(content2), Some(FileFormat::Nexus));
    }

    #[test]
    fn test_detect_loci() {
        let content = ">taxon_a   ACGT\n>taxon_b   ACGA\n//      -    *|1|\n";
        assert_eq!(detect_format_from_content(content), Some(FileFormat::Loci));
    }

    #[test]
    fn test_detect_unknown() {
        let content = "This is not a valid sequence file\n";
        assert_eq!(detect_format_from_content(content), None);
        assert!(matches!(sniff(content, "x"), Err(ParseError::UnknownFormat(_))));
    }

    #[test]
    fn test_detect_with_leading_empty_lines() {
        let content = "\n\n  \n>seq1\nACGT\n";
        assert_eq!(detect_format_from_content(content), Some(FileFormat::Fasta));
    }

    #[test]
    fn test_sniff_sequence_code() {
        let (format, code) = sniff(">a\nMKVLAAGLLDW\n>b\nMKVLAAGLLDW\n", "x").unwrap();
        assert_eq!(format, FileFormat::Fasta);
        assert_eq!(code.alphabet, Alphabet::Protein);

        let nexus = "#NEXUS\nbegin data;\nmatrix\n[comment]\ntaxon_a ACGTACGTACGTACGTACGT?\n;\nend;\n";
        let (_, code) = sniff(nexus, "x").unwrap();
        assert_eq!(code, SequenceCode::dna().with_missing('?'));
    }

    #[test]
    fn test_sniff_all_gap_sample() {
        assert!(matches!(
            sniff(">a\n----\n>b\nACGT\n", "x"),
            Err(ParseError::EmptySequence { .. })
        ));
    }

    #[test]
    fn test_duplicate_taxon_after_cleaning() {
        let content = ">Homo_sapiens\nACGT\n>Pan\nACGT\n>Homo_sapiens;\nACGT\n";
        match parse_content(content, "apes", &ParseOptions::default()) {
            Err(ParseError::DuplicateTaxon { file, taxa }) => {
                assert_eq!(file, "apes");
                assert_eq!(taxa, vec!["Homo_sapiens"]);
            }
            other => panic!("expected DuplicateTaxon, got {:?}", other),
        }
    }

    #[test]
    fn test_spaced_fasta_headers() {
        let content = ">Homo sapiens\nACGT\n>Homo erectus\nACGA\n";
        let aln = parse_content(content, "f", &ParseOptions::default()).unwrap();
        assert_eq!(aln.taxa(), &["Homo_sapiens", "Homo_erectus"]);

        let content = ">Homo sapiens\nACGT\n>Homo_sapiens\nACGA\n";
        assert!(matches!(
            parse_content(content, "f", &ParseOptions::default()),
            Err(ParseError::DuplicateTaxon { ref taxa, .. }) if taxa == &["Homo_sapiens"]
        ));
    }

    #[test]
    fn test_loci_duplicate_in_block() {
        let content = ">a ACGT\n>b ACGA\n>a TTTT\n//\n";
        match parse_content(content, "rad", &ParseOptions::default()) {
            Err(ParseError::DuplicateTaxon { file, taxa }) => {
                assert_eq!(file, "rad");
                assert_eq!(taxa, vec!["a"]);
            }
            other => panic!("expected DuplicateTaxon, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_content_lowercases() {
        let aln = parse_content(">a\nACGT\n>b\nAC-T\n", "locus", &ParseOptions::default()).unwrap();
        assert_eq!(aln.sequence("a").unwrap(), "acgt");
        assert_eq!(aln.input_format, Some(FileFormat::Fasta));
        assert!(aln.is_alignment);
    }

    #[test]
    fn test_phylip_header_length_mismatch() {
        let aln = parse_content("2 6\na ACGT\nb ACGT\n", "p", &ParseOptions::default()).unwrap();
        assert!(!aln.is_alignment);
        assert!(aln.warning.is_some());
    }

    #[test]
    fn test_forced_options() {
        let options = ParseOptions {
            format: Some(FileFormat::Fasta),
            sequence_code: Some(SequenceCode::protein()),
            ..ParseOptions::default()
        };
        let aln = parse_content(">a\nACGT\n", "forced", &options).unwrap();
        assert_eq!(aln.sequence_code, SequenceCode::protein());
    }

    #[test]
    fn test_parse_file_names_alignment_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("COI.fas");
        std::fs::write(&path, ">a\nACGT\n>b\nACGA\n").unwrap();

        let aln = parse_file(&path, &ParseOptions::default()).unwrap();
        assert_eq!(aln.name, "COI");
        assert_eq!(aln.path.as_deref(), Some(path.as_path()));

        let empty = dir.path().join("empty.fas");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            parse_file(&empty, &ParseOptions::default()),
            Err(ParseError::EmptyFile)
        ));
    }
}
