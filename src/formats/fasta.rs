//! FASTA reader and writer.
//!
//! Single-line and multi-line records are both accepted.
//!
//! ## FASTA Format
//!
//! ```text
//! >sequence_identifier optional description
//! ACGTACGTACGT...
//! >another_sequence
//! TGCATGCATGCA...
//! ```
//!
//! The identifier is the whole header, its words joined by `_`.
//! Whitespace and `*` stop codons are dropped from sequence lines.

use std::io::Write;

use thiserror::Error;

use super::ParsedRecords;
use crate::model::{Alignment, AlignmentResult, Sequence};
use crate::output::{WriteOptions, INTERLEAVE_WIDTH};

/// Errors that can occur during FASTA parsing.
#[derive(Error, Debug)]
pub enum FastaError {
    #[error("Empty FASTA file")]
    EmptyFile,

    #[error("Invalid FASTA format: {0}")]
    InvalidFormat(String),

    #[error("Sequence without header at line {0}")]
    SequenceWithoutHeader(usize),
}

/// Result type for FASTA operations.
pub type FastaResult<T> = Result<T, FastaError>;

/// Parses FASTA content from a string.
///
/// Records with an empty body are kept so the caller can report them.
pub fn parse_fasta_str(content: &str) -> FastaResult<ParsedRecords> {
    let mut sequences = Vec::new();
    let mut current_id: Option<String> = None;
    let mut current_seq = String::new();

    for (index, line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('>') {
            if let Some(id) = current_id.take() {
                sequences.push(Sequence::new(id, std::mem::take(&mut current_seq)));
            }

            let id = header.split_whitespace().collect::<Vec<_>>().join("_");
            if id.is_empty() {
                return Err(FastaError::InvalidFormat(format!(
                    "Empty sequence identifier at line {}",
                    line_number
                )));
            }
            current_id = Some(id);
        } else {
            if current_id.is_none() {
                return Err(FastaError::SequenceWithoutHeader(line_number));
            }
            current_seq.extend(line.chars().filter(|c| !c.is_whitespace() && *c != '*'));
        }
    }

    if let Some(id) = current_id {
        sequences.push(Sequence::new(id, current_seq));
    }

    if sequences.is_empty() {
        return Err(FastaError::EmptyFile);
    }

    Ok(ParsedRecords {
        sequences,
        ..ParsedRecords::default()
    })
}

/// Writes the alignment as FASTA, upper-cased, optionally wrapped.
pub fn write_fasta<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    for row in alignment.sequences() {
        let (taxon, data) = row?;
        writeln!(out, ">{}", taxon)?;
        let data = data.to_uppercase();
        if options.interleave {
            for chunk in data.as_bytes().chunks(INTERLEAVE_WIDTH) {
                out.write_all(chunk)?;
                writeln!(out)?;
            }
        } else {
            writeln!(out, "{}", data)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceCode;
    use crate::store::StorageBackend;

    #[test]
    fn test_parse_simple_fasta() {
        let parsed = parse_fasta_str(">seq1\nACGT\n>seq2\nTGCA\n").unwrap();

        assert_eq!(parsed.sequences.len(), 2);
        assert_eq!(parsed.sequences[0], Sequence::new("seq1", "ACGT"));
        assert_eq!(parsed.sequences[1], Sequence::new("seq2", "TGCA"));
        assert!(parsed.partitions.is_none());
    }

    #[test]
    fn test_parse_multiline_sequence() {
        let parsed = parse_fasta_str(">seq1\nACGT\nTGCA\nAA AA\n").unwrap();
        assert_eq!(parsed.sequences[0].data, "ACGTTGCAAAAA");
    }

    #[test]
    fn test_parse_with_description_and_stops() {
        let parsed = parse_fasta_str(">seq1 This is a description\nMKV*\n").unwrap();
        assert_eq!(parsed.sequences[0].id, "seq1_This_is_a_description");
        assert_eq!(parsed.sequences[0].data, "MKV");
    }

    #[test]
    fn test_spaced_headers_stay_distinct() {
        let parsed = parse_fasta_str(">Homo sapiens\nACGT\n>Homo  erectus\tbone\nACGA\n").unwrap();
        let ids: Vec<&str> = parsed.sequences.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Homo_sapiens", "Homo_erectus_bone"]);
    }

    #[test]
    fn test_empty_body_is_kept() {
        let parsed = parse_fasta_str(">seq1\n>seq2\nACGT\n").unwrap();
        assert_eq!(parsed.sequences.len(), 2);
        assert!(parsed.sequences[0].is_empty());
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(parse_fasta_str(""), Err(FastaError::EmptyFile)));
    }

    #[test]
    fn test_sequence_without_header() {
        let result = parse_fasta_str("ACGT\n>seq1\nTGCA\n");
        assert!(matches!(result, Err(FastaError::SequenceWithoutHeader(1))));
    }

    #[test]
    fn test_write_fasta_interleaved() {
        let long = "a".repeat(100);
        let aln = Alignment::from_sequences(
            "x",
            vec![Sequence::new("t1", long.clone())],
            SequenceCode::dna(),
            &StorageBackend::Memory,
        )
        .unwrap();

        let mut out = Vec::new();
        write_fasta(&aln, &mut out, &WriteOptions::default()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!(">t1\n{}\n", "A".repeat(100)));

        let options = WriteOptions {
            interleave: true,
            ..WriteOptions::default()
        };
        let mut out = Vec::new();
        write_fasta(&aln, &mut out, &options).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1).map(str::len), Some(90));
        assert_eq!(text.lines().nth(2).map(str::len), Some(10));
    }
}
