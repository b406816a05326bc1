//! Alignment transformations.
//!
//! Each operation reads the current rows, builds its result in a fresh
//! store of the alignment's backend and swaps it in only once complete.
//! If anything fails half-way the alignment is left as it was.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, warn};

use crate::model::{Alignment, AlignmentError, AlignmentResult, GAP};
use crate::partitions::Partitions;

/// Taxon name of a consensus sequence.
pub const CONSENSUS_TAXON: &str = "consensus";

/// IUPAC ambiguity codes keyed by their sorted nucleotide set.
const IUPAC: [(&str, u8); 11] = [
    ("ag", b'r'),
    ("ct", b'y'),
    ("cg", b's'),
    ("at", b'w'),
    ("gt", b'k'),
    ("ac", b'm'),
    ("cgt", b'b'),
    ("agt", b'd'),
    ("act", b'h'),
    ("acg", b'v'),
    ("acgt", b'n'),
];

/// How variable columns are reduced by [`Alignment::consensus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMode {
    /// Variable columns become the matching IUPAC ambiguity code.
    Iupac,
    /// Variable columns become the missing-data symbol.
    SoftMask,
    /// Variable columns are dropped.
    Remove,
    /// The first taxon's sequence, unchanged.
    FirstSequence,
}

/// Nucleotides behind a base or an ambiguity code.
fn expand(state: u8) -> Option<&'static [u8]> {
    match state {
        b'a' => Some(b"a"),
        b'c' => Some(b"c"),
        b'g' => Some(b"g"),
        b't' => Some(b"t"),
        _ => IUPAC
            .iter()
            .find(|(_, code)| *code == state)
            .map(|&(bases, _)| bases.as_bytes()),
    }
}

/// Ambiguity code covering every state, `None` outside the nucleotide alphabet.
fn ambiguity_code(states: &BTreeSet<u8>) -> Option<u8> {
    let mut bases = BTreeSet::new();
    for &state in states {
        bases.extend(expand(state)?.iter().copied());
    }
    let key: String = bases.into_iter().map(char::from).collect();
    IUPAC.iter().find(|(set, _)| *set == key).map(|&(_, code)| code)
}

/// Maximal runs of gaps as `(start, end)` spans, end exclusive.
fn gap_runs(row: &[u8]) -> Vec<(usize, usize)> {
    let gap = GAP as u8;
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &b) in row.iter().enumerate() {
        match (b == gap, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, row.len()));
    }
    runs
}

/// Binary indel state of one taxon for one span.
///
/// `1`: the span is a gap bounded by data (or a sequence end) on both sides.
/// `-`: the span is a gap inside a longer gap. `0`: the taxon has data there.
fn indel_state(row: &[u8], (start, end): (usize, usize)) -> char {
    let gap = GAP as u8;
    let all_gap = row
        .get(start..end)
        .map_or(false, |span| span.iter().all(|&b| b == gap));
    if !all_gap {
        return '0';
    }
    let before = start.checked_sub(1).and_then(|i| row.get(i)).copied();
    let after = row.get(end).copied();
    if before == Some(gap) || after == Some(gap) {
        '-'
    } else {
        '1'
    }
}

/// Replaces leading and trailing gaps with the missing-data symbol.
fn soften_terminal_gaps(row: &mut [u8], missing: u8) {
    let gap = GAP as u8;
    for b in row.iter_mut().take_while(|b| **b == gap) {
        *b = missing;
    }
    for b in row.iter_mut().rev().take_while(|b| **b == gap) {
        *b = missing;
    }
}

/// Keeps the bytes whose mask entry is true.
fn compress(row: &[u8], mask: &[bool]) -> String {
    let kept: Vec<u8> = row
        .iter()
        .zip(mask)
        .filter(|(_, keep)| **keep)
        .map(|(b, _)| *b)
        .collect();
    String::from_utf8_lossy(&kept).into_owned()
}

impl Alignment {
    fn require_alignment(&self) -> AlignmentResult<()> {
        if !self.is_alignment {
            return Err(AlignmentError::NotAnAlignment(self.name.clone()));
        }
        if self.is_empty() {
            return Err(AlignmentError::EmptyAlignment(self.name.clone()));
        }
        Ok(())
    }

    /// Symbols of column `col`, skipping gaps and missing data.
    fn column_states(&self, rows: &[Vec<u8>], col: usize) -> Vec<u8> {
        let gap = GAP as u8;
        let missing = self.sequence_code.missing as u8;
        rows.iter()
            .filter_map(|row| row.get(col).copied())
            .filter(|&b| b != gap && b != missing)
            .collect()
    }

    /// Swaps in `rows` under the current taxa.
    fn commit_rows(&mut self, rows: &[String], locus_length: usize) -> AlignmentResult<()> {
        let taxa = self.taxa().iter().map(String::as_str);
        let store = self.build_store(taxa.zip(rows.iter().map(String::as_str)))?;
        let taxa = self.taxa().to_vec();
        self.replace_contents(taxa, store, locus_length);
        Ok(())
    }

    /// Merges identical sequences into haplotypes named `{prefix}_{n}`.
    ///
    /// Returns each haplotype with the taxa it replaces, in order of first
    /// occurrence.
    pub fn collapse(&mut self, prefix: &str) -> AlignmentResult<Vec<(String, Vec<String>)>> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in self.sequences() {
            let (taxon, data) = row?;
            match index.get(&data) {
                Some(&i) => groups[i].1.push(taxon.to_string()),
                None => {
                    index.insert(data.clone(), groups.len());
                    groups.push((data, vec![taxon.to_string()]));
                }
            }
        }

        let names: Vec<String> = (1..=groups.len()).map(|n| format!("{}_{}", prefix, n)).collect();
        let store = self.build_store(
            names
                .iter()
                .map(String::as_str)
                .zip(groups.iter().map(|(data, _)| data.as_str())),
        )?;
        let locus_length = self.locus_length();
        debug!(
            "{}: collapsed {} taxa into {} haplotypes",
            self.name,
            self.taxa_count(),
            names.len()
        );
        self.replace_contents(names.clone(), store, locus_length);

        Ok(names
            .into_iter()
            .zip(groups.into_iter().map(|(_, taxa)| taxa))
            .collect())
    }

    /// Consensus sequence of every taxon, as a single [`CONSENSUS_TAXON`] row.
    ///
    /// A column holding only gaps and missing data yields the missing
    /// symbol, unless it holds a single symbol throughout. The partition
    /// scheme is reset to one partition.
    pub fn consensus(&mut self, mode: ConsensusMode) -> AlignmentResult<()> {
        if self.is_empty() {
            return Err(AlignmentError::EmptyAlignment(self.name.clone()));
        }
        let rows = self.load_rows()?;
        let sequence: Vec<u8> = match mode {
            ConsensusMode::FirstSequence => rows.first().cloned().unwrap_or_default(),
            _ => {
                self.require_alignment()?;
                self.column_consensus(&rows, mode)
            }
        };

        let sequence = String::from_utf8_lossy(&sequence).into_owned();
        let store = self.build_store([(CONSENSUS_TAXON, sequence.as_str())])?;
        let locus_length = sequence.len();
        self.replace_contents(vec![CONSENSUS_TAXON.to_string()], store, locus_length);
        self.restriction_range = None;
        self.is_alignment = true;
        self.warning = None;
        let partitions = Partitions::single(&self.name, locus_length);
        self.set_partitions_unchecked(partitions);
        Ok(())
    }

    fn column_consensus(&self, rows: &[Vec<u8>], mode: ConsensusMode) -> Vec<u8> {
        let missing = self.sequence_code.missing as u8;
        let mut sequence = Vec::with_capacity(self.locus_length());
        for col in 0..self.locus_length() {
            let all: BTreeSet<u8> = rows.iter().filter_map(|row| row.get(col).copied()).collect();
            if all.len() == 1 {
                sequence.extend(all);
                continue;
            }
            let states: BTreeSet<u8> = self.column_states(rows, col).into_iter().collect();
            match states.len() {
                0 => sequence.push(missing),
                1 => sequence.extend(states),
                _ => match mode {
                    ConsensusMode::Iupac => {
                        sequence.push(ambiguity_code(&states).unwrap_or(missing))
                    }
                    ConsensusMode::SoftMask => sequence.push(missing),
                    ConsensusMode::Remove | ConsensusMode::FirstSequence => {}
                },
            }
        }
        sequence
    }

    /// Removes columns with too much missing data.
    ///
    /// Terminal gaps are first turned into missing data. A column is then
    /// dropped when its gap plus missing percentage exceeds `gap_threshold`
    /// or its missing percentage exceeds `missing_threshold`. Partition
    /// ranges are not adjusted.
    pub fn filter_missing_data(
        &mut self,
        gap_threshold: f64,
        missing_threshold: f64,
    ) -> AlignmentResult<()> {
        self.require_alignment()?;
        let gap = GAP as u8;
        let missing = self.sequence_code.missing as u8;
        let mut rows = self.load_rows()?;
        for row in &mut rows {
            soften_terminal_gaps(row, missing);
        }

        let taxa = rows.len() as f64;
        let mask: Vec<bool> = (0..self.locus_length())
            .map(|col| {
                let column = || rows.iter().filter_map(|row| row.get(col).copied());
                let gap_pct = column().filter(|&b| b == gap).count() as f64 / taxa * 100.0;
                let missing_pct = column().filter(|&b| b == missing).count() as f64 / taxa * 100.0;
                !(gap_pct + missing_pct > gap_threshold || missing_pct > missing_threshold)
            })
            .collect();

        let filtered: Vec<String> = rows.iter().map(|row| compress(row, &mask)).collect();
        let locus_length = mask.iter().filter(|keep| **keep).count();
        let removed = self.locus_length() - locus_length;
        self.commit_rows(&filtered, locus_length)?;

        debug!("{}: removed {} columns with missing data", self.name, removed);
        if removed > 0 && !self.partitions().is_single() {
            warn!(
                "{}: partition ranges were not adjusted after removing {} columns",
                self.name, removed
            );
        }
        Ok(())
    }

    /// Appends a binary indel block (Simmons & Ochoterena simple coding).
    ///
    /// One character per distinct gap span of the alignment. The block is
    /// recorded in `restriction_range`, which restricts output to NEXUS.
    pub fn code_gaps(&mut self) -> AlignmentResult<()> {
        self.require_alignment()?;
        if self.restriction_range.is_some() {
            warn!("{}: gaps are already coded", self.name);
            return Ok(());
        }
        let rows = self.load_rows()?;

        let mut seen = HashSet::new();
        let mut spans = Vec::new();
        for row in &rows {
            for span in gap_runs(row) {
                if seen.insert(span) {
                    spans.push(span);
                }
            }
        }
        if spans.is_empty() {
            debug!("{}: no indels to code", self.name);
            return Ok(());
        }

        let coded: Vec<String> = rows
            .iter()
            .map(|row| {
                let mut sequence = String::from_utf8_lossy(row).into_owned();
                sequence.extend(spans.iter().map(|&span| indel_state(row, span)));
                sequence
            })
            .collect();

        let data_length = self.locus_length();
        self.commit_rows(&coded, data_length + spans.len())?;
        self.restriction_range = Some((data_length, data_length + spans.len() - 1));
        debug!("{}: coded {} indels", self.name, spans.len());
        Ok(())
    }

    /// Keeps only the columns whose codon position (0-based column mod 3)
    /// is enabled in `keep`. The partition scheme is reset to one partition.
    pub fn filter_codon_positions(&mut self, keep: [bool; 3]) -> AlignmentResult<()> {
        self.require_alignment()?;
        let rows = self.load_rows()?;
        let mask: Vec<bool> = (0..self.locus_length()).map(|col| keep[col % 3]).collect();
        let filtered: Vec<String> = rows.iter().map(|row| compress(row, &mask)).collect();
        let locus_length = mask.iter().filter(|k| **k).count();
        self.commit_rows(&filtered, locus_length)?;
        let partitions = Partitions::single(&self.name, locus_length);
        self.set_partitions_unchecked(partitions);
        Ok(())
    }

    /// Columns with more than one state, gaps and missing data ignored.
    pub fn count_segregating_sites(&self) -> AlignmentResult<usize> {
        self.require_alignment()?;
        let rows = self.load_rows()?;
        Ok((0..self.data_length())
            .filter(|&col| {
                let states: HashSet<u8> = self.column_states(&rows, col).into_iter().collect();
                states.len() > 1
            })
            .count())
    }

    /// Parsimony-informative columns: at least two states each present in
    /// at least two taxa.
    pub fn count_informative_sites(&self) -> AlignmentResult<usize> {
        self.require_alignment()?;
        let rows = self.load_rows()?;
        Ok((0..self.data_length())
            .filter(|&col| {
                let mut counts: HashMap<u8, usize> = HashMap::new();
                for state in self.column_states(&rows, col) {
                    *counts.entry(state).or_default() += 1;
                }
                counts.values().filter(|&&n| n >= 2).count() >= 2
            })
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Sequence, SequenceCode};
    use crate::partitions::PartitionSpan;
    use crate::store::StorageBackend;

    fn alignment(rows: &[(&str, &str)]) -> Alignment {
        let sequences = rows.iter().map(|(id, data)| Sequence::new(*id, *data)).collect();
        Alignment::from_sequences("locus", sequences, SequenceCode::dna(), &StorageBackend::Memory)
            .unwrap()
    }

    #[test]
    fn test_collapse() {
        let mut aln = alignment(&[
            ("a", "acgt"),
            ("b", "aaaa"),
            ("c", "acgt"),
            ("d", "aaaa"),
            ("e", "cccc"),
        ]);
        let haplotypes = aln.collapse("Hap").unwrap();

        assert_eq!(aln.taxa(), &["Hap_1", "Hap_2", "Hap_3"]);
        assert_eq!(aln.sequence("Hap_2").unwrap(), "aaaa");
        assert_eq!(haplotypes[0], ("Hap_1".to_string(), vec!["a".to_string(), "c".to_string()]));
        assert_eq!(haplotypes[2].1, vec!["e".to_string()]);
    }

    #[test]
    fn test_consensus_modes() {
        let rows = [("a", "acgt-"), ("b", "acga-"), ("c", "gcgtn")];

        let mut aln = alignment(&rows);
        aln.consensus(ConsensusMode::Iupac).unwrap();
        assert_eq!(aln.taxa(), &[CONSENSUS_TAXON]);
        assert_eq!(aln.sequence(CONSENSUS_TAXON).unwrap(), "rcgwn");

        let mut aln = alignment(&rows);
        aln.consensus(ConsensusMode::SoftMask).unwrap();
        assert_eq!(aln.sequence(CONSENSUS_TAXON).unwrap(), "ncgnn");

        let mut aln = alignment(&rows);
        aln.consensus(ConsensusMode::Remove).unwrap();
        assert_eq!(aln.sequence(CONSENSUS_TAXON).unwrap(), "cgn");
        assert_eq!(aln.locus_length(), 3);
        assert!(aln.partitions().validate(3).is_ok());

        let mut aln = alignment(&rows);
        aln.consensus(ConsensusMode::FirstSequence).unwrap();
        assert_eq!(aln.sequence(CONSENSUS_TAXON).unwrap(), "acgt-");
    }

    #[test]
    fn test_ambiguity_of_ambiguity_codes() {
        let states: BTreeSet<u8> = [b'r', b'c'].into_iter().collect();
        assert_eq!(ambiguity_code(&states), Some(b'v'));
        let states: BTreeSet<u8> = [b'm', b'l'].into_iter().collect();
        assert_eq!(ambiguity_code(&states), None);
    }

    #[test]
    fn test_soften_terminal_gaps() {
        let mut row = b"--ac-g--".to_vec();
        soften_terminal_gaps(&mut row, b'n');
        assert_eq!(row, b"nnac-gnn");

        let mut row = b"----".to_vec();
        soften_terminal_gaps(&mut row, b'n');
        assert_eq!(row, b"nnnn");
    }

    #[test]
    fn test_filter_missing_data_threshold_is_strict() {
        let mut aln = alignment(&[("t1", "a--a"), ("t2", "a--a"), ("t3", "a-aa"), ("t4", "aaaa")]);
        aln.filter_missing_data(50.0, 100.0).unwrap();

        assert_eq!(aln.locus_length(), 3);
        assert_eq!(aln.sequence("t1").unwrap(), "a-a");
        assert_eq!(aln.sequence("t4").unwrap(), "aaa");
    }

    #[test]
    fn test_filter_missing_data_counts_softened_gaps() {
        // Column 0 is two terminal gaps, i.e. 50% missing after softening.
        let mut aln = alignment(&[("t1", "-aa"), ("t2", "-aa"), ("t3", "aaa"), ("t4", "aaa")]);
        aln.filter_missing_data(100.0, 25.0).unwrap();
        assert_eq!(aln.sequence("t1").unwrap(), "aa");
    }

    #[test]
    fn test_filter_missing_data_keeps_stale_partitions() {
        let mut aln = alignment(&[("t1", "a--aaa"), ("t2", "a--aaa")]);
        let mut partitions = Partitions::new();
        partitions.add_partition("p1", PartitionSpan::Length(3)).unwrap();
        partitions.add_partition("p2", PartitionSpan::Length(3)).unwrap();
        aln.set_partitions(partitions.clone()).unwrap();

        aln.filter_missing_data(50.0, 50.0).unwrap();
        assert_eq!(aln.locus_length(), 4);
        assert_eq!(aln.partitions(), &partitions);
    }

    #[test]
    fn test_code_gaps_single_span() {
        let mut aln = alignment(&[("a", "aaa---aaa"), ("b", "aaaaaaaaa")]);
        aln.code_gaps().unwrap();

        assert_eq!(aln.sequence("a").unwrap(), "aaa---aaa1");
        assert_eq!(aln.sequence("b").unwrap(), "aaaaaaaaa0");
        assert_eq!(aln.restriction_range, Some((9, 9)));
        assert_eq!(aln.locus_length(), 10);
        assert_eq!(aln.data_length(), 9);
    }

    #[test]
    fn test_code_gaps_nested_indels() {
        let mut aln = alignment(&[("a", "a----a"), ("b", "a-a--a"), ("c", "aaaaaa")]);
        aln.code_gaps().unwrap();

        // Spans: (1,5) from a, then (1,2) and (3,5) from b.
        assert_eq!(aln.sequence("a").unwrap(), "a----a1--");
        assert_eq!(aln.sequence("b").unwrap(), "a-a--a011");
        assert_eq!(aln.sequence("c").unwrap(), "aaaaaa000");
        assert_eq!(aln.restriction_range, Some((6, 8)));
    }

    #[test]
    fn test_code_gaps_rejects_non_alignment() {
        let mut aln = alignment(&[("a", "aa-a"), ("b", "aa")]);
        assert!(matches!(aln.code_gaps(), Err(AlignmentError::NotAnAlignment(_))));
        assert_eq!(aln.sequence("a").unwrap(), "aa-a");
        assert!(aln.restriction_range.is_none());
    }

    #[test]
    fn test_filter_codon_positions() {
        let mut aln = alignment(&[("a", "acgtac"), ("b", "ggcctt")]);
        aln.filter_codon_positions([true, true, false]).unwrap();
        assert_eq!(aln.sequence("a").unwrap(), "acta");
        assert_eq!(aln.sequence("b").unwrap(), "ggct");
        assert!(aln.partitions().validate(4).is_ok());
    }

    #[test]
    fn test_variation_counts() {
        let aln = alignment(&[("a", "aat-"), ("b", "aaan"), ("c", "gcaa"), ("d", "gcac")]);
        assert_eq!(aln.count_segregating_sites().unwrap(), 4);
        assert_eq!(aln.count_informative_sites().unwrap(), 2);
    }
}
