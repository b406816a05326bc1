//! NEXUS reader and writer.
//!
//! ## NEXUS Format
//!
//! ```text
//! #NEXUS
//! BEGIN DATA;
//!   DIMENSIONS NTAX=3 NCHAR=10;
//!   FORMAT DATATYPE=DNA GAP=- MISSING=?;
//!   MATRIX
//!     seq1 ACGTACGTAC
//!     seq2 TGCATGCATG
//!     seq3 AAAACCCCGG
//!   ;
//! END;
//! BEGIN MRBAYES;
//!   charset first = 1-6;
//!   charset second = 7-10;
//!   lset applyto=(1) nst=6;
//! END;
//! ```
//!
//! The reader is a three-state line scanner (before, in and after the
//! matrix). Rows whose name was already seen are appended to, which is how
//! interleaved blocks accumulate. `charset`, `lset` and `prset` lines are
//! collected wherever they appear and resolved once the sequence length is
//! known.

use std::collections::HashMap;
use std::io::Write;

use log::warn;
use thiserror::Error;

use super::ParsedRecords;
use crate::model::{Alignment, AlignmentResult, Sequence, GAP};
use crate::output::{WriteOptions, INTERLEAVE_WIDTH};
use crate::partitions::{PartitionError, Partitions};

/// Name of the charset covering the binary gap-coding block.
pub const GAP_CODING_PARTITION: &str = "gap_coding";

/// Errors that can occur during NEXUS parsing.
#[derive(Error, Debug)]
pub enum NexusError {
    #[error("Not a NEXUS file (must start with #NEXUS)")]
    NotNexus,

    #[error("Empty NEXUS file")]
    EmptyFile,

    #[error("Missing MATRIX command")]
    MissingMatrix,

    #[error("Unterminated MATRIX (missing ';')")]
    UnterminatedMatrix,

    #[error("Invalid charset at line {line}: {source}")]
    Charset { line: usize, source: PartitionError },

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },
}

/// Result type for NEXUS operations.
pub type NexusResult<T> = Result<T, NexusError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    BeforeMatrix,
    InMatrix,
    AfterMatrix,
}

/// Partitions a model command applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelTarget {
    All,
    /// 1-based partition indices from `applyto=(...)`.
    Indices(Vec<usize>),
    /// The last partition declared before the command (0 = none yet).
    Current(usize),
}

/// Parses NEXUS content from a string.
pub fn parse_nexus_str(content: &str) -> NexusResult<ParsedRecords> {
    let first_non_empty = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or(NexusError::EmptyFile)?;
    if !first_non_empty.trim().to_uppercase().starts_with("#NEXUS") {
        return Err(NexusError::NotNexus);
    }

    let mut state = ScanState::BeforeMatrix;
    let mut order: Vec<String> = Vec::new();
    let mut data: HashMap<String, String> = HashMap::new();
    let mut missing = None;
    let mut charsets: Vec<(usize, String)> = Vec::new();
    let mut models: Vec<(ModelTarget, String)> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line_number = index + 1;
        let cleaned = remove_nexus_comments(raw);
        let line = cleaned.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();

        if lower.starts_with("charset") {
            charsets.push((line_number, line.to_string()));
            continue;
        }
        if lower.starts_with("lset") || lower.starts_with("prset") {
            models.push(parse_model_command(line, charsets.len()));
            continue;
        }

        match state {
            ScanState::BeforeMatrix => {
                if lower.starts_with("format") {
                    if let Some(symbol) =
                        extract_param(&lower, "missing").and_then(|v| v.chars().next())
                    {
                        missing = Some(symbol);
                    }
                } else if lower.starts_with("matrix") {
                    state = ScanState::InMatrix;
                }
            }
            ScanState::InMatrix => {
                if line == ";" {
                    state = ScanState::AfterMatrix;
                    continue;
                }
                let (row, closes) = match line.strip_suffix(';') {
                    Some(row) => (row.trim(), true),
                    None => (line, false),
                };
                if !row.is_empty() {
                    let (name, sequence) =
                        split_matrix_row(row).ok_or_else(|| NexusError::ParseError {
                            line: line_number,
                            message: "expected 'NAME SEQUENCE' in matrix".to_string(),
                        })?;
                    match data.get_mut(&name) {
                        Some(existing) => existing.push_str(&sequence),
                        None => {
                            order.push(name.clone());
                            data.insert(name, sequence);
                        }
                    }
                }
                if closes {
                    state = ScanState::AfterMatrix;
                }
            }
            ScanState::AfterMatrix => {}
        }
    }

    match state {
        ScanState::BeforeMatrix => return Err(NexusError::MissingMatrix),
        ScanState::InMatrix => return Err(NexusError::UnterminatedMatrix),
        ScanState::AfterMatrix => {}
    }

    let sequences: Vec<Sequence> = order
        .into_iter()
        .map(|name| {
            let sequence = data.remove(&name).unwrap_or_default();
            Sequence::new(name, sequence)
        })
        .collect();
    let length = sequences.first().map(Sequence::len).unwrap_or(0);

    let mut records = ParsedRecords {
        sequences,
        missing,
        ..ParsedRecords::default()
    };

    if charsets.is_empty() {
        records.models = models.into_iter().map(|(_, model)| model).collect();
        return Ok(records);
    }

    let mut partitions = Partitions::with_length(length);
    for (line, charset) in &charsets {
        partitions
            .read_from_nexus_charset(charset)
            .map_err(|source| NexusError::Charset { line: *line, source })?;
    }
    apply_models(&mut partitions, models);
    records.partitions = Some(partitions);
    Ok(records)
}

fn apply_models(partitions: &mut Partitions, models: Vec<(ModelTarget, String)>) {
    let names = partitions.names();
    for (target, model) in models {
        let indices: Vec<usize> = match target {
            ModelTarget::All => (0..names.len()).collect(),
            ModelTarget::Indices(indices) => {
                indices.into_iter().filter_map(|i| i.checked_sub(1)).collect()
            }
            ModelTarget::Current(declared) => vec![declared.min(names.len()).saturating_sub(1)],
        };
        for index in indices {
            match names.get(index).and_then(|name| partitions.get_mut(name)) {
                Some(partition) => partition.models.push(model.clone()),
                None => warn!("Model '{}' applies to unknown partition {}", model, index + 1),
            }
        }
    }
}

/// Splits an `lset`/`prset` command into its target and its body without `applyto`.
fn parse_model_command(line: &str, declared: usize) -> (ModelTarget, String) {
    let body = line.trim().trim_end_matches(';').trim();
    let lower = body.to_ascii_lowercase();
    let normalise = |text: &str| text.split_whitespace().collect::<Vec<_>>().join(" ");

    let Some(position) = lower.find("applyto") else {
        return (ModelTarget::Current(declared), normalise(body));
    };
    let after = &body[position..];
    let close = after.find(')').map(|i| i + 1).unwrap_or(after.len());
    let inside = after[..close]
        .split_once('(')
        .map(|(_, rest)| rest.trim_end_matches(')'))
        .unwrap_or_default();

    let target = if inside.trim().eq_ignore_ascii_case("all") {
        ModelTarget::All
    } else {
        ModelTarget::Indices(inside.split(',').filter_map(|t| t.trim().parse().ok()).collect())
    };
    let command = format!("{} {}", &body[..position], &after[close..]);
    (target, normalise(&command))
}

/// Splits a matrix row into a (possibly quoted) name and its sequence.
fn split_matrix_row(row: &str) -> Option<(String, String)> {
    let (name, rest) = if let Some(quoted) = row.strip_prefix('\'') {
        let end = quoted.find('\'')?;
        (&quoted[..end], &quoted[end + 1..])
    } else {
        let end = row.find(char::is_whitespace)?;
        (&row[..end], &row[end..])
    };
    let sequence: String = rest.split_whitespace().collect();
    if name.is_empty() || sequence.is_empty() {
        return None;
    }
    Some((name.to_string(), sequence))
}

/// Removes NEXUS comments (bracketed text) from a line.
fn remove_nexus_comments(line: &str) -> String {
    let mut result = String::new();
    let mut in_comment = false;

    for c in line.chars() {
        if c == '[' {
            in_comment = true;
        } else if c == ']' {
            in_comment = false;
        } else if !in_comment {
            result.push(c);
        }
    }

    result
}

/// Extracts a parameter value from a NEXUS command line.
fn extract_param<'a>(line: &'a str, param: &str) -> Option<&'a str> {
    let idx = line.find(param)?;
    let after = &line[idx + param.len()..];

    // Skip to '='
    let eq_idx = after.find('=')?;
    let after_eq = after[eq_idx + 1..].trim_start();

    // Value ends at whitespace, ';', or end
    let end = after_eq
        .find(|c: char| c.is_whitespace() || c == ';')
        .unwrap_or(after_eq.len());

    let value = after_eq[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Writes the alignment as NEXUS, with a MrBayes block when partitioned
/// or gap-coded and an outgroup block when outgroups are requested.
pub fn write_nexus<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let code = alignment.sequence_code;
    let datatype = match alignment.restriction_range {
        Some((start, end)) => format!(
            "mixed({}:1-{},restriction:{}-{})",
            code.alphabet,
            start,
            start + 1,
            end + 1
        ),
        None => code.alphabet.to_string(),
    };
    let label = options.nexus_label;

    writeln!(out, "#NEXUS\n\nBegin data;")?;
    writeln!(
        out,
        "\tdimensions ntax={} nchar={} ;",
        alignment.taxa_count(),
        alignment.locus_length()
    )?;
    writeln!(
        out,
        "\tformat datatype={} interleave={} gap={} missing={} ;",
        datatype,
        if options.interleave { "yes" } else { "no" },
        GAP,
        code.missing.to_ascii_uppercase()
    )?;
    writeln!(out, "\tmatrix")?;

    if options.interleave {
        let rows = alignment.load_rows()?;
        let length = alignment.locus_length();
        let mut start = 0;
        while start < length {
            if start > 0 {
                writeln!(out)?;
            }
            let end = (start + INTERLEAVE_WIDTH).min(length);
            for (taxon, row) in alignment.taxa().iter().zip(&rows) {
                let slice = row.get(start..end).unwrap_or_default();
                let residues = String::from_utf8_lossy(slice).to_uppercase();
                writeln!(out, "{}{}", label.format(taxon), residues)?;
            }
            start = end;
        }
    } else {
        for row in alignment.sequences() {
            let (taxon, data) = row?;
            writeln!(out, "{}{}", label.format(taxon), data.to_uppercase())?;
        }
    }
    writeln!(out, "\t;\n\tend;")?;

    write_mrbayes_block(alignment, out, options)?;
    write_outgroup_block(alignment, out, options)?;
    Ok(())
}

fn write_mrbayes_block<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let partitions = alignment.partitions();
    let gap_coding = alignment.restriction_range;
    if !options.use_charset
        || (partitions.is_single() && gap_coding.is_none())
        || partitions.is_empty()
    {
        return Ok(());
    }

    let mut charsets: Vec<String> = partitions
        .to_nexus_charset_text()
        .lines()
        .map(str::to_string)
        .collect();
    let mut names = partitions.get_partition_names();
    if let Some((start, end)) = gap_coding {
        charsets.push(format!("charset {} = {}-{};", GAP_CODING_PARTITION, start + 1, end + 1));
        names.push(GAP_CODING_PARTITION.to_string());
    }

    writeln!(out, "\nbegin mrbayes;")?;
    for charset in charsets {
        writeln!(out, "\t{}", charset)?;
    }
    writeln!(out, "\tpartition part = {}: {};", names.len(), names.join(", "))?;
    writeln!(out, "\tset partition=part;")?;
    if options.use_nexus_models {
        for line in partitions.to_mrbayes_model_text().lines() {
            writeln!(out, "\t{}", line)?;
        }
    }
    writeln!(out, "end;")?;
    Ok(())
}

fn write_outgroup_block<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let (present, absent): (Vec<&String>, Vec<&String>) = options
        .outgroups
        .iter()
        .partition(|taxon| alignment.contains_taxon(taxon));
    for taxon in absent {
        warn!("Outgroup '{}' is not in alignment '{}'", taxon, alignment.name);
    }
    if let Some(first) = present.first() {
        writeln!(out, "\nbegin mrbayes;\n\toutgroup {};\nend;", first)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceCode;
    use crate::partitions::PartitionSpan;
    use crate::store::StorageBackend;

    const PARTITIONED: &str = "#NEXUS
BEGIN DATA;
  DIMENSIONS NTAX=2 NCHAR=10;
  FORMAT DATATYPE=DNA GAP=- MISSING=?;
  MATRIX
  [first block]
    seq1 ACGTAC
    seq2 TGCATG
    charset first = 1-6;

    seq1 GTAC
    seq2 CA?A
  ;
END;
begin mrbayes;
  charset second = 7-10;
  lset applyto=(2) nst=6 rates=gamma;
  prset applyto=(all) statefreqpr=fixed(equal);
end;
";

    #[test]
    fn test_parse_interleaved_with_charsets() {
        let parsed = parse_nexus_str(PARTITIONED).unwrap();

        assert_eq!(parsed.sequences.len(), 2);
        assert_eq!(parsed.sequences[0], Sequence::new("seq1", "ACGTACGTAC"));
        assert_eq!(parsed.sequences[1].data, "TGCATGCA?A");
        assert_eq!(parsed.missing, Some('?'));

        let partitions = parsed.partitions.unwrap();
        assert_eq!(partitions.names(), vec!["first", "second"]);
        assert!(partitions.validate(10).is_ok());
        assert_eq!(
            partitions.get("second").unwrap().models,
            vec!["lset nst=6 rates=gamma", "prset statefreqpr=fixed(equal)"]
        );
        assert_eq!(
            partitions.get("first").unwrap().models,
            vec!["prset statefreqpr=fixed(equal)"]
        );
    }

    #[test]
    fn test_parse_without_charsets() {
        let content = "#NEXUS\nbegin data;\nmatrix\n'taxon one' ACGT\ntaxon_2 AC-T;\nlset nst=2;\nend;\n";
        let parsed = parse_nexus_str(content).unwrap();
        assert_eq!(parsed.sequences[0].id, "taxon one");
        assert_eq!(parsed.sequences[1].data, "AC-T");
        assert!(parsed.partitions.is_none());
        assert_eq!(parsed.models, vec!["lset nst=2"]);
    }

    #[test]
    fn test_model_without_applyto_follows_last_charset() {
        let (target, body) = parse_model_command("lset nst=6 rates=invgamma;", 3);
        assert_eq!(target, ModelTarget::Current(3));
        assert_eq!(body, "lset nst=6 rates=invgamma");

        let (target, body) = parse_model_command("LSET APPLYTO=(1, 3) NST=1;", 0);
        assert_eq!(target, ModelTarget::Indices(vec![1, 3]));
        assert_eq!(body, "LSET NST=1");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_nexus_str(""), Err(NexusError::EmptyFile)));
        assert!(matches!(parse_nexus_str(">seq\nACGT\n"), Err(NexusError::NotNexus)));
        assert!(matches!(
            parse_nexus_str("#NEXUS\nbegin data;\nend;\n"),
            Err(NexusError::MissingMatrix)
        ));
        assert!(matches!(
            parse_nexus_str("#NEXUS\nmatrix\nseq1 ACGT\n"),
            Err(NexusError::UnterminatedMatrix)
        ));
        assert!(matches!(
            parse_nexus_str("#NEXUS\nmatrix\nACGT\n;\n"),
            Err(NexusError::ParseError { line: 3, .. })
        ));
    }

    #[test]
    fn test_remove_comments() {
        assert_eq!(remove_nexus_comments("seq1 [note] ACGT"), "seq1  ACGT");
    }

    fn alignment() -> Alignment {
        Alignment::from_sequences(
            "locus",
            vec![Sequence::new("a", "acgtac"), Sequence::new("b", "ac--ac")],
            SequenceCode::dna(),
            &StorageBackend::Memory,
        )
        .unwrap()
    }

    #[test]
    fn test_write_single_partition() {
        let mut out = Vec::new();
        write_nexus(&alignment(), &mut out, &WriteOptions::default()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("#NEXUS\n\nBegin data;\n\tdimensions ntax=2 nchar=6 ;\n"));
        assert!(text.contains("\tformat datatype=DNA interleave=no gap=- missing=N ;\n\tmatrix\n"));
        assert!(text.contains(&format!("{:<40}ACGTAC\n", "a")));
        assert!(text.ends_with("\t;\n\tend;\n"));
        assert!(!text.contains("begin mrbayes"));
    }

    #[test]
    fn test_write_partitions_and_outgroup() {
        let mut aln = alignment();
        let mut partitions = Partitions::new();
        partitions.add_partition("g1", PartitionSpan::Length(3)).unwrap();
        partitions
            .add_partition("g2", PartitionSpan::Length(3))
            .unwrap()
            .models
            .push("JC".to_string());
        aln.set_partitions(partitions).unwrap();

        let options = WriteOptions {
            outgroups: vec!["b".to_string(), "zzz".to_string()],
            ..WriteOptions::default()
        };
        let mut out = Vec::new();
        write_nexus(&aln, &mut out, &options).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains(
            "begin mrbayes;\n\tcharset g1 = 1-3;\n\tcharset g2 = 4-6;\n\tpartition part = 2: g1, g2;\n\tset partition=part;\n\tlset applyto=(2) nst=1;\n"
        ));
        assert!(text.contains("begin mrbayes;\n\toutgroup b;\nend;"));
    }

    #[test]
    fn test_write_gap_coded_header() {
        let mut aln = alignment();
        aln.code_gaps().unwrap();

        let mut out = Vec::new();
        write_nexus(&aln, &mut out, &WriteOptions::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("datatype=mixed(DNA:1-6,restriction:7-7)"));
        assert!(text.contains("nchar=7"));
        assert!(text.contains("\tcharset gap_coding = 7-7;"));
    }
}
