//! PHYLIP reader and writers.
//!
//! Only the sequential layout is read: one `NAME SEQUENCE` row per taxon
//! after the `ntax nchar` header.
//!
//! ```text
//!  3 10
//! Seq1      ACGTACGTAC
//! Seq2      TGCATGCATG
//! Seq3      AAAACCCCGG
//! ```
//!
//! Interleaved files (more rows than `ntax`) are rejected with
//! [`PhylipError::Interleaved`] instead of being read wrongly.
//!
//! Two writers live here: plain PHYLIP and the MCMCTree flavour, which
//! repeats the header once per partition.

use std::io::Write;

use log::warn;
use thiserror::Error;

use super::ParsedRecords;
use crate::model::{Alignment, AlignmentResult, Sequence};
use crate::output::WriteOptions;

/// Errors that can occur during PHYLIP parsing.
#[derive(Error, Debug)]
pub enum PhylipError {
    #[error("Empty PHYLIP file")]
    EmptyFile,

    #[error("Invalid header: expected 'ntax nchar' (two integers), got '{0}'")]
    InvalidHeader(String),

    #[error("Invalid sequence count in header: '{0}' is not a valid number")]
    InvalidSequenceCount(String),

    #[error("Invalid sequence length in header: '{0}' is not a valid number")]
    InvalidSequenceLength(String),

    #[error("No sequence data found after header")]
    NoSequenceData,

    #[error("Interleaved PHYLIP is not supported (line {line}: more rows than the {expected} declared taxa)")]
    Interleaved { expected: usize, line: usize },

    #[error("Line {line}: {message}")]
    ParseError { line: usize, message: String },
}

/// Result type for PHYLIP operations.
pub type PhylipResult<T> = Result<T, PhylipError>;

/// Parses sequential PHYLIP content from a string.
pub fn parse_phylip_str(content: &str) -> PhylipResult<ParsedRecords> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines.next().ok_or(PhylipError::EmptyFile)?;
    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(PhylipError::InvalidHeader(header.to_string()));
    }
    let ntax: usize = parts[0]
        .parse()
        .map_err(|_| PhylipError::InvalidSequenceCount(parts[0].to_string()))?;
    let nchar: usize = parts[1]
        .parse()
        .map_err(|_| PhylipError::InvalidSequenceLength(parts[1].to_string()))?;
    if ntax == 0 {
        return Err(PhylipError::InvalidSequenceCount("0".to_string()));
    }

    let mut sequences = Vec::with_capacity(ntax);
    for (line_number, line) in lines {
        if sequences.len() == ntax {
            return Err(PhylipError::Interleaved {
                expected: ntax,
                line: line_number,
            });
        }
        let (name, data) = split_name_and_sequence(line).ok_or_else(|| PhylipError::ParseError {
            line: line_number,
            message: "expected 'NAME SEQUENCE'".to_string(),
        })?;
        sequences.push(Sequence::new(name, data));
    }

    if sequences.is_empty() {
        return Err(PhylipError::NoSequenceData);
    }
    if sequences.len() < ntax {
        warn!("PHYLIP header declares {} taxa but {} were found", ntax, sequences.len());
    }

    Ok(ParsedRecords {
        sequences,
        declared_length: Some(nchar),
        ..ParsedRecords::default()
    })
}

/// Splits a row into its name and its whitespace-free sequence.
fn split_name_and_sequence(line: &str) -> Option<(&str, String)> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let data: String = tokens.collect();
    if data.is_empty() {
        return None;
    }
    Some((name, data))
}

/// Writes the alignment as sequential PHYLIP.
pub fn write_phylip<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let label = options.phylip_columns();
    writeln!(out, "{} {}", alignment.taxa_count(), alignment.locus_length())?;
    for row in alignment.sequences() {
        let (taxon, data) = row?;
        writeln!(out, "{}{}", label.format(taxon), data.to_uppercase())?;
    }
    Ok(())
}

/// Writes one PHYLIP block per partition, as read by MCMCTree.
pub fn write_mcmctree<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let label = options.phylip_columns();
    let rows = alignment.load_rows()?;
    let ranges: Vec<(usize, usize)> = if alignment.partitions().is_empty() {
        vec![(0, alignment.data_length().saturating_sub(1))]
    } else {
        alignment.partitions().iter().map(|p| (p.start, p.end)).collect()
    };

    for (block, (start, end)) in ranges.into_iter().enumerate() {
        if block > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{} {}", alignment.taxa_count(), end + 1 - start)?;
        for (taxon, row) in alignment.taxa().iter().zip(&rows) {
            let slice = row.get(start..=end).unwrap_or_default();
            writeln!(
                out,
                "{}  {}",
                label.truncate(taxon),
                String::from_utf8_lossy(slice).to_uppercase()
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceCode;
    use crate::partitions::{PartitionSpan, Partitions};
    use crate::store::StorageBackend;

    #[test]
    fn test_parse_sequential() {
        let content = " 3 10\nSeq1      ACGTACGTAC\nSeq2 TGCATGCATG\n\nSeq3 AAAAC CCCGG\n";
        let parsed = parse_phylip_str(content).unwrap();

        assert_eq!(parsed.sequences.len(), 3);
        assert_eq!(parsed.declared_length, Some(10));
        assert_eq!(parsed.sequences[2], Sequence::new("Seq3", "AAAACCCCGG"));
    }

    #[test]
    fn test_interleaved_is_rejected() {
        let content = "2 8\nSeq1 ACGT\nSeq2 TGCA\n\nACGT\nTGCA\n";
        assert!(matches!(
            parse_phylip_str(content),
            Err(PhylipError::Interleaved { expected: 2, line: 5 })
        ));
    }

    #[test]
    fn test_invalid_header() {
        assert!(matches!(parse_phylip_str("3\n"), Err(PhylipError::InvalidHeader(_))));
        assert!(matches!(
            parse_phylip_str("x 10\n"),
            Err(PhylipError::InvalidSequenceCount(_))
        ));
        assert!(matches!(parse_phylip_str("2 10\n"), Err(PhylipError::NoSequenceData)));
        assert!(matches!(parse_phylip_str(""), Err(PhylipError::EmptyFile)));
    }

    #[test]
    fn test_row_without_sequence() {
        assert!(matches!(
            parse_phylip_str("1 4\nSeq1\n"),
            Err(PhylipError::ParseError { line: 2, .. })
        ));
    }

    fn two_locus_alignment() -> Alignment {
        let mut aln = Alignment::from_sequences(
            "cat",
            vec![Sequence::new("a", "acgtaa"), Sequence::new("b", "tttccc")],
            SequenceCode::dna(),
            &StorageBackend::Memory,
        )
        .unwrap();
        let mut partitions = Partitions::new();
        partitions.add_partition("g1", PartitionSpan::Length(4)).unwrap();
        partitions.add_partition("g2", PartitionSpan::Length(2)).unwrap();
        aln.set_partitions(partitions).unwrap();
        aln
    }

    #[test]
    fn test_write_phylip() {
        let options = WriteOptions {
            phylip_truncate: true,
            ..WriteOptions::default()
        };
        let mut out = Vec::new();
        write_phylip(&two_locus_alignment(), &mut out, &options).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2 6\na          ACGTAA\nb          TTTCCC\n"
        );
    }

    #[test]
    fn test_write_mcmctree_blocks() {
        let mut out = Vec::new();
        write_mcmctree(&two_locus_alignment(), &mut out, &WriteOptions::default()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2 4\na  ACGT\nb  TTTC\n\n2 2\na  AA\nb  CC\n"
        );
    }
}
