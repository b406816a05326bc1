//! Reader for pyRAD-style `.loci` files.
//!
//! ```text
//! >taxon_a      ACGTACGT
//! >taxon_b      ACGAACGT
//! //                 *     |1|
//! >taxon_a      TTGA
//! >taxon_c      TTGC
//! //               *       |2|
//! ```
//!
//! Every block becomes one partition (`locus_1`, `locus_2`, ...). Taxa absent
//! from a block are filled with the missing-data symbol over the block
//! length, so the result is a single concatenated matrix.

use std::collections::HashMap;

use thiserror::Error;

use super::ParsedRecords;
use crate::model::Sequence;
use crate::partitions::{PartitionError, PartitionSpan, Partitions};

/// Errors that can occur during loci parsing.
#[derive(Error, Debug)]
pub enum LociError {
    #[error("Empty loci file")]
    EmptyFile,

    #[error("Line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Line {line}: taxon '{taxon}' appears twice in the same locus")]
    DuplicateTaxon { line: usize, taxon: String },

    #[error("{0}")]
    Partition(#[from] PartitionError),
}

/// Result type for loci operations.
pub type LociResult<T> = Result<T, LociError>;

/// Parses loci content, padding absent taxa with `missing`.
pub fn parse_loci_str(content: &str, missing: char) -> LociResult<ParsedRecords> {
    // First pass: every taxon of the file, in order of first appearance.
    let mut taxa: Vec<&str> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for line in content.lines() {
        if let Some(record) = line.trim().strip_prefix('>') {
            if let Some(name) = record.split_whitespace().next() {
                if !index.contains_key(name) {
                    index.insert(name, taxa.len());
                    taxa.push(name);
                }
            }
        }
    }
    if taxa.is_empty() {
        return Err(LociError::EmptyFile);
    }

    let mut sequences = vec![String::new(); taxa.len()];
    let mut partitions = Partitions::new();
    let mut block: Vec<(usize, String)> = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("//") {
            flush_block(&mut block, &mut sequences, &mut partitions, missing)?;
            continue;
        }

        let record = line.strip_prefix('>').ok_or_else(|| LociError::ParseError {
            line: i + 1,
            message: "expected '>TAXON SEQUENCE' or a '//' terminator".to_string(),
        })?;
        let mut tokens = record.split_whitespace();
        let name = tokens.next().unwrap_or_default();
        let data: String = tokens.collect();
        if data.is_empty() {
            return Err(LociError::ParseError {
                line: i + 1,
                message: format!("taxon '{}' has no sequence", name),
            });
        }
        if let Some(&slot) = index.get(name) {
            if block.iter().any(|(seen, _)| *seen == slot) {
                return Err(LociError::DuplicateTaxon {
                    line: i + 1,
                    taxon: name.to_string(),
                });
            }
            block.push((slot, data));
        }
    }
    flush_block(&mut block, &mut sequences, &mut partitions, missing)?;

    let sequences = taxa
        .into_iter()
        .zip(sequences)
        .map(|(name, data)| Sequence::new(name, data))
        .collect();

    Ok(ParsedRecords {
        sequences,
        partitions: Some(partitions),
        ..ParsedRecords::default()
    })
}

/// Appends one finished block to every taxon and records it as a partition.
fn flush_block(
    block: &mut Vec<(usize, String)>,
    sequences: &mut [String],
    partitions: &mut Partitions,
    missing: char,
) -> LociResult<()> {
    let Some(length) = block.first().map(|(_, data)| data.len()) else {
        return Ok(());
    };

    let mut present = vec![false; sequences.len()];
    for (slot, data) in block.drain(..) {
        sequences[slot].push_str(&data);
        present[slot] = true;
    }
    for (sequence, _) in sequences.iter_mut().zip(present).filter(|(_, seen)| !seen) {
        sequence.extend(std::iter::repeat(missing).take(length));
    }

    let name = format!("locus_{}", partitions.len() + 1);
    partitions.add_partition(&name, PartitionSpan::Length(length))?;
    Ok(())
}
