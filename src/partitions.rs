//! Partition bookkeeping.
//!
//! A [`Partitions`] value is an ordered list of named, contiguous site ranges
//! covering an alignment, each optionally carrying codon sub-positions and
//! substitution model strings.
//!
//! Ranges are 0-based and end-inclusive internally. Both text forms use
//! 1-based coordinates:
//!
//! ```text
//! GTR, gene1 = 1-450                  (RAxML partition file)
//! charset gene1 = 1-450;              (NEXUS charset)
//! charset gene2_1 = 451-900\3;        (NEXUS codon position, stride 3)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

/// Errors that can occur while building or reading partitions.
#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("Partitions cover {partitions} sites but the alignment has {alignment} sites")]
    Inconsistent { partitions: usize, alignment: usize },

    #[error("Partition '{name}' starts at site {start} but site {next} was expected (overlapping ranges)")]
    Overlap { name: String, start: usize, next: usize },

    #[error("Partition '{name}' starts at site {start} but site {next} was expected (unassigned sites)")]
    Gap { name: String, start: usize, next: usize },

    #[error("Partition '{0}' has an empty range")]
    EmptyRange(String),

    #[error("Malformed partition line '{line}': {reason}")]
    Malformed { line: String, reason: String },

    #[error("Partition '{0}' uses '.' as its end but the alignment length is unknown")]
    DotNotationWithoutLength(String),

    #[error("No partition named '{0}'")]
    UnknownPartition(String),

    #[error("Could not recognise partition file format (expected RAxML or NEXUS charset lines)")]
    UnknownFormat,

    #[error("Failed to access partition file: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for partition operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Text serialisation of a partition scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFormat {
    Raxml,
    Nexus,
}

/// How a new partition is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSpan {
    /// Appended right after the current last partition.
    Length(usize),
    /// Explicit 0-based inclusive range.
    Range(usize, usize),
}

/// One named site range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    /// First site (0-based).
    pub start: usize,
    /// Last site (0-based, inclusive).
    pub end: usize,
    /// Codon positions (1, 2, 3) reported as separate stride-3 subsets.
    pub codon_positions: Option<Vec<u8>>,
    /// Opaque model descriptions: RAxML model names or NEXUS `lset`/`prset` bodies.
    pub models: Vec<String>,
    /// Name of the alignment this partition came from, if known.
    pub source: Option<String>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    /// First model that reads as a RAxML model name.
    pub fn raxml_model(&self) -> Option<&str> {
        self.models
            .iter()
            .map(String::as_str)
            .find(|m| !m.contains(char::is_whitespace) && !m.contains('='))
    }

    /// Names under which this partition is exported (codon subsets expanded).
    pub fn exported_names(&self) -> Vec<String> {
        match &self.codon_positions {
            Some(positions) => positions
                .iter()
                .map(|p| format!("{}_{}", self.name, p))
                .collect(),
            None => vec![self.name.clone()],
        }
    }
}

/// MrBayes `lset`/`prset` arguments for the common nucleotide models.
pub fn mrbayes_model(name: &str) -> Option<[&'static str; 2]> {
    let args = match name.to_uppercase().as_str() {
        "GTR" => ["nst=6", "statefreqpr=dirichlet(1,1,1,1)"],
        "SYM" => ["nst=6", "statefreqpr=fixed(equal)"],
        "HKY" => ["nst=2", "statefreqpr=dirichlet(1,1,1,1)"],
        "K2P" => ["nst=2", "statefreqpr=fixed(equal)"],
        "F81" => ["nst=1", "statefreqpr=dirichlet(1,1,1,1)"],
        "JC" => ["nst=1", "statefreqpr=fixed(equal)"],
        _ => return None,
    };
    Some(args)
}

/// A range read from text, before it is placed.
#[derive(Debug, Clone)]
struct ParsedRange {
    name: String,
    start: usize,
    end: Option<usize>,
    stride: bool,
    models: Vec<String>,
}

/// Ordered partition scheme of one alignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partitions {
    entries: Vec<Partition>,
    /// Next unassigned site.
    counter: usize,
    /// Alignment length, used to resolve the `.` end notation.
    partition_length: Option<usize>,
}

impl Partitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty scheme that knows the length of the alignment it will describe.
    pub fn with_length(length: usize) -> Self {
        Self {
            partition_length: Some(length),
            ..Self::default()
        }
    }

    /// One partition spanning `length` sites.
    pub fn single(name: &str, length: usize) -> Self {
        let mut partitions = Self::with_length(length);
        if length > 0 {
            partitions.entries.push(Partition {
                name: name.to_string(),
                start: 0,
                end: length - 1,
                codon_positions: None,
                models: Vec::new(),
                source: None,
            });
            partitions.counter = length;
        }
        partitions
    }

    pub fn set_length(&mut self, length: usize) {
        self.partition_length = Some(length);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next unassigned site, i.e. the number of sites covered so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.entries.iter_mut().find(|p| p.name == name)
    }

    /// Partition names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|p| p.name.clone()).collect()
    }

    /// Names with codon subsets expanded to `NAME_1`, `NAME_2`, ...
    pub fn get_partition_names(&self) -> Vec<String> {
        self.entries.iter().flat_map(Partition::exported_names).collect()
    }

    /// True iff exactly one plain partition covers the whole alignment.
    pub fn is_single(&self) -> bool {
        match self.entries.as_slice() {
            [only] => only.start == 0 && only.codon_positions.is_none(),
            _ => false,
        }
    }

    fn unique_name(&self, name: &str) -> String {
        if self.get(name).is_none() {
            return name.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", name, n);
            if self.get(&candidate).is_none() {
                warn!("Duplicate partition name '{}' renamed to '{}'", name, candidate);
                return candidate;
            }
            n += 1;
        }
    }

    /// Appends a partition and returns it for further annotation.
    ///
    /// A [`PartitionSpan::Length`] starts right after the previous partition;
    /// a [`PartitionSpan::Range`] must start exactly there. Duplicate names
    /// get a `_N` suffix.
    pub fn add_partition(
        &mut self,
        name: &str,
        span: PartitionSpan,
    ) -> PartitionResult<&mut Partition> {
        let (start, end) = match span {
            PartitionSpan::Length(0) => return Err(PartitionError::EmptyRange(name.to_string())),
            PartitionSpan::Length(n) => (self.counter, self.counter + n - 1),
            PartitionSpan::Range(start, end) => {
                if end < start {
                    return Err(PartitionError::EmptyRange(name.to_string()));
                }
                if start < self.counter {
                    return Err(PartitionError::Overlap {
                        name: name.to_string(),
                        start: start + 1,
                        next: self.counter + 1,
                    });
                }
                if start > self.counter {
                    return Err(PartitionError::Gap {
                        name: name.to_string(),
                        start: start + 1,
                        next: self.counter + 1,
                    });
                }
                (start, end)
            }
        };

        let name = self.unique_name(name);
        self.entries.push(Partition {
            name,
            start,
            end,
            codon_positions: None,
            models: Vec::new(),
            source: None,
        });
        self.counter = end + 1;
        let last = self.entries.len() - 1;
        Ok(&mut self.entries[last])
    }

    /// Appends every partition of `other`, shifted by `offset` sites.
    pub fn merge(&mut self, other: &Partitions, offset: usize) -> PartitionResult<()> {
        if let Some(first) = other.entries.first() {
            let start = first.start + offset;
            if start < self.counter {
                return Err(PartitionError::Overlap {
                    name: first.name.clone(),
                    start: start + 1,
                    next: self.counter + 1,
                });
            }
            if start > self.counter {
                return Err(PartitionError::Gap {
                    name: first.name.clone(),
                    start: start + 1,
                    next: self.counter + 1,
                });
            }
        }
        for partition in &other.entries {
            let name = self.unique_name(&partition.name);
            self.entries.push(Partition {
                name,
                start: partition.start + offset,
                end: partition.end + offset,
                ..partition.clone()
            });
        }
        self.counter = self.counter.max(offset + other.counter);
        Ok(())
    }

    /// Checks that the partitions cover exactly `total_length` sites.
    pub fn validate(&self, total_length: usize) -> PartitionResult<()> {
        let covered: usize = self.entries.iter().map(Partition::len).sum();
        if covered != total_length {
            return Err(PartitionError::Inconsistent {
                partitions: covered,
                alignment: total_length,
            });
        }
        Ok(())
    }

    /// Removes a partition and packs the remaining ones from site 0.
    pub fn remove_partition(&mut self, name: &str) -> PartitionResult<()> {
        let before = self.entries.len();
        self.entries.retain(|p| p.name != name);
        if self.entries.len() == before {
            return Err(PartitionError::UnknownPartition(name.to_string()));
        }
        self.repack();
        Ok(())
    }

    /// Removes every partition that came from alignment `source`.
    pub fn remove_file(&mut self, source: &str) {
        self.entries.retain(|p| p.source.as_deref() != Some(source));
        self.repack();
    }

    fn repack(&mut self) {
        let mut running = 0;
        for partition in &mut self.entries {
            let len = partition.len();
            partition.start = running;
            partition.end = running + len - 1;
            running += len;
        }
        self.counter = running;
    }

    pub fn change_name(&mut self, old: &str, new: &str) -> PartitionResult<()> {
        let partition = self
            .get_mut(old)
            .ok_or_else(|| PartitionError::UnknownPartition(old.to_string()))?;
        partition.name = new.to_string();
        Ok(())
    }

    pub fn set_model(&mut self, name: &str, models: Vec<String>) -> PartitionResult<()> {
        let partition = self
            .get_mut(name)
            .ok_or_else(|| PartitionError::UnknownPartition(name.to_string()))?;
        partition.models = models;
        Ok(())
    }

    /// Parses `charset NAME = START-END;` (optionally `\3` strided or ending in `.`).
    pub fn read_from_nexus_charset(&mut self, line: &str) -> PartitionResult<()> {
        let parsed = parse_charset_line(line)?;
        self.insert(parsed)
    }

    /// Parses `MODEL, NAME = START-END`.
    pub fn read_from_raxml_line(&mut self, line: &str) -> PartitionResult<()> {
        let parsed = parse_raxml_line(line)?;
        self.insert(parsed)
    }

    fn insert(&mut self, parsed: ParsedRange) -> PartitionResult<()> {
        let end = match parsed.end {
            Some(end) => end,
            None => self
                .partition_length
                .filter(|&length| length > 0)
                .map(|length| length - 1)
                .ok_or_else(|| PartitionError::DotNotationWithoutLength(parsed.name.clone()))?,
        };

        if !parsed.stride {
            let partition =
                self.add_partition(&parsed.name, PartitionSpan::Range(parsed.start, end))?;
            partition.models = parsed.models;
            return Ok(());
        }

        // Later positions of a codon partition fold into the existing entry.
        if let Some(parent) = self.entries.iter_mut().rev().find(|p| {
            p.end == end
                && p.codon_positions.is_some()
                && parsed.start >= p.start
                && parsed.start < p.start + 3
        }) {
            let position = (parsed.start - parent.start + 1) as u8;
            if let Some(positions) = parent.codon_positions.as_mut() {
                if !positions.contains(&position) {
                    positions.push(position);
                    positions.sort_unstable();
                }
            }
            if parent.models.is_empty() {
                parent.models = parsed.models;
            }
            return Ok(());
        }

        let start = self.counter;
        if parsed.start < start || parsed.start >= start + 3 {
            return Err(PartitionError::Gap {
                name: parsed.name,
                start: parsed.start + 1,
                next: start + 1,
            });
        }
        let position = (parsed.start - start + 1) as u8;
        let name = strip_codon_suffix(&parsed.name).to_string();
        let partition = self.add_partition(&name, PartitionSpan::Range(start, end))?;
        partition.codon_positions = Some(vec![position]);
        partition.models = parsed.models;
        Ok(())
    }

    /// Reads a stand-alone partition file (RAxML or NEXUS charsets) and
    /// appends its partitions, sorted by start site.
    pub fn read_from_file<P: AsRef<Path>>(&mut self, path: P) -> PartitionResult<()> {
        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| {
                let lower = line.to_lowercase();
                !(lower.starts_with("#nexus")
                    || lower.starts_with("begin ")
                    || lower.starts_with("end;"))
            })
            .collect();

        let format = match lines.first() {
            Some(line) if first_token_lower(line) == "charset" => PartitionFormat::Nexus,
            Some(line) if line.contains(',') && line.contains('=') => PartitionFormat::Raxml,
            _ => return Err(PartitionError::UnknownFormat),
        };

        let mut parsed = Vec::with_capacity(lines.len());
        for line in lines {
            match format {
                PartitionFormat::Nexus => parsed.push(parse_charset_line(line)?),
                PartitionFormat::Raxml => parsed.push(parse_raxml_line(line)?),
            }
        }
        parsed.sort_by_key(|p| p.start);

        debug!(
            "Read {} partition lines from {}",
            parsed.len(),
            path.as_ref().display()
        );
        for entry in parsed {
            self.insert(entry)?;
        }
        Ok(())
    }

    /// RAxML partition file text.
    pub fn to_raxml_text(&self, default_model: &str) -> String {
        let mut text = String::new();
        for partition in &self.entries {
            let model = partition.raxml_model().unwrap_or(default_model);
            match &partition.codon_positions {
                Some(positions) => {
                    for p in positions {
                        text.push_str(&format!(
                            "{}, {}_{} = {}-{}\\3\n",
                            model,
                            partition.name,
                            p,
                            partition.start + *p as usize,
                            partition.end + 1
                        ));
                    }
                }
                None => text.push_str(&format!(
                    "{}, {} = {}-{}\n",
                    model,
                    partition.name,
                    partition.start + 1,
                    partition.end + 1
                )),
            }
        }
        text
    }

    /// NEXUS `charset` lines.
    pub fn to_nexus_charset_text(&self) -> String {
        let mut text = String::new();
        for partition in &self.entries {
            match &partition.codon_positions {
                Some(positions) => {
                    for p in positions {
                        text.push_str(&format!(
                            "charset {}_{} = {}-{}\\3;\n",
                            partition.name,
                            p,
                            partition.start + *p as usize,
                            partition.end + 1
                        ));
                    }
                }
                None => text.push_str(&format!(
                    "charset {} = {}-{};\n",
                    partition.name,
                    partition.start + 1,
                    partition.end + 1
                )),
            }
        }
        text
    }

    /// MrBayes `lset`/`prset` lines, one `applyto` index per exported partition.
    ///
    /// RAxML model names found in the MrBayes table are translated; stored
    /// `lset`/`prset` commands are re-targeted. Anything else is skipped.
    pub fn to_mrbayes_model_text(&self) -> String {
        let mut text = String::new();
        let mut index = 0;
        for partition in &self.entries {
            for _ in partition.exported_names() {
                index += 1;
                for model in &partition.models {
                    if let Some([lset, prset]) = mrbayes_model(model) {
                        text.push_str(&format!("lset applyto=({}) {};\n", index, lset));
                        text.push_str(&format!("prset applyto=({}) {};\n", index, prset));
                        continue;
                    }
                    let mut words = model.splitn(2, char::is_whitespace);
                    let command = words.next().unwrap_or_default().to_lowercase();
                    if command == "lset" || command == "prset" {
                        let rest = words.next().unwrap_or_default().trim();
                        text.push_str(&format!("{} applyto=({}) {};\n", command, index, rest));
                    }
                }
            }
        }
        text
    }

    /// Writes the partition scheme next to `stem` and returns the file path.
    pub fn write_to_file<P: AsRef<Path>>(
        &self,
        format: PartitionFormat,
        stem: P,
        default_model: &str,
    ) -> PartitionResult<PathBuf> {
        let stem = stem.as_ref().to_string_lossy().into_owned();
        let (path, text) = match format {
            PartitionFormat::Raxml => (
                PathBuf::from(format!("{}_part.File", stem)),
                self.to_raxml_text(default_model),
            ),
            PartitionFormat::Nexus => (
                PathBuf::from(format!("{}.charset", stem)),
                self.to_nexus_charset_text(),
            ),
        };
        fs::write(&path, text)?;
        Ok(path)
    }
}

fn first_token_lower(line: &str) -> String {
    line.split(|c: char| c.is_whitespace() || c == '=')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Drops a trailing `_1`, `_2` or `_3` codon suffix.
fn strip_codon_suffix(name: &str) -> &str {
    for suffix in ["_1", "_2", "_3"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped;
            }
        }
    }
    name
}

fn malformed(line: &str, reason: &str) -> PartitionError {
    PartitionError::Malformed {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses `START-END`, `START-END\3`, `START-.` or `START` (1-based).
fn parse_range(line: &str, text: &str) -> PartitionResult<(usize, Option<usize>, bool)> {
    let text = text.trim().trim_end_matches(';').trim();
    let (range, stride) = match text.split_once('\\') {
        Some((range, stride)) => {
            if stride.trim() != "3" {
                return Err(malformed(line, "only a stride of 3 is supported"));
            }
            (range.trim(), true)
        }
        None => (text, false),
    };
    if range.contains(',')
        || range
            .split('-')
            .any(|part| part.trim().contains(char::is_whitespace))
    {
        return Err(malformed(line, "multiple ranges per partition are not supported"));
    }

    let parse_site = |s: &str| -> PartitionResult<usize> {
        let site: usize = s
            .trim()
            .parse()
            .map_err(|_| malformed(line, "range bounds must be positive integers"))?;
        if site == 0 {
            return Err(malformed(line, "sites are numbered from 1"));
        }
        Ok(site - 1)
    };

    match range.split_once('-') {
        Some((start, end)) => {
            let start = parse_site(start)?;
            let end = if end.trim() == "." { None } else { Some(parse_site(end)?) };
            Ok((start, end, stride))
        }
        None => {
            let site = parse_site(range)?;
            Ok((site, Some(site), stride))
        }
    }
}

fn parse_charset_line(line: &str) -> PartitionResult<ParsedRange> {
    let trimmed = line.trim();
    if first_token_lower(trimmed) != "charset" {
        return Err(malformed(line, "expected a 'charset' command"));
    }
    let body = &trimmed["charset".len()..];
    let (name, range) = body
        .split_once('=')
        .ok_or_else(|| malformed(line, "missing '='"))?;
    let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
    if name.is_empty() {
        return Err(malformed(line, "missing partition name"));
    }
    let (start, end, stride) = parse_range(line, range)?;
    Ok(ParsedRange {
        name: name.to_string(),
        start,
        end,
        stride,
        models: Vec::new(),
    })
}

fn parse_raxml_line(line: &str) -> PartitionResult<ParsedRange> {
    let (head, range) = line
        .split_once('=')
        .ok_or_else(|| malformed(line, "missing '='"))?;
    let (model, name) = head
        .split_once(',')
        .ok_or_else(|| malformed(line, "expected 'MODEL, NAME'"))?;
    let (model, name) = (model.trim(), name.trim());
    if model.is_empty() || name.is_empty() {
        return Err(malformed(line, "expected 'MODEL, NAME'"));
    }
    let (start, end, stride) = parse_range(line, range)?;
    Ok(ParsedRange {
        name: name.to_string(),
        start,
        end,
        stride,
        models: vec![model.to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_by_length_offsets_automatically() {
        let mut partitions = Partitions::new();
        partitions.add_partition("a", PartitionSpan::Length(10)).unwrap();
        partitions.add_partition("b", PartitionSpan::Length(5)).unwrap();

        let b = partitions.get("b").unwrap();
        assert_eq!((b.start, b.end), (10, 14));
        assert_eq!(partitions.counter(), 15);
        assert!(!partitions.is_single());
    }

    #[test]
    fn test_add_range_must_be_contiguous() {
        let mut partitions = Partitions::new();
        partitions.add_partition("a", PartitionSpan::Range(0, 9)).unwrap();
        assert!(matches!(
            partitions.add_partition("b", PartitionSpan::Range(5, 20)),
            Err(PartitionError::Overlap { .. })
        ));
        assert!(matches!(
            partitions.add_partition("b", PartitionSpan::Range(12, 20)),
            Err(PartitionError::Gap { .. })
        ));
        partitions.add_partition("b", PartitionSpan::Range(10, 20)).unwrap();
        assert_eq!(partitions.counter(), 21);
    }

    #[test]
    fn test_duplicate_names_are_suffixed() {
        let mut partitions = Partitions::new();
        partitions.add_partition("gene", PartitionSpan::Length(3)).unwrap();
        partitions.add_partition("gene", PartitionSpan::Length(3)).unwrap();
        partitions.add_partition("gene", PartitionSpan::Length(3)).unwrap();
        assert_eq!(partitions.names(), vec!["gene", "gene_1", "gene_2"]);
    }

    #[test]
    fn test_merge_shifts_ranges() {
        let mut first = Partitions::single("locus_a", 10);
        let mut second = Partitions::new();
        second.add_partition("x", PartitionSpan::Length(4)).unwrap();
        second.add_partition("y", PartitionSpan::Length(6)).unwrap();

        first.merge(&second, 10).unwrap();
        let y = first.get("y").unwrap();
        assert_eq!((y.start, y.end), (14, 19));
        assert_eq!(first.counter(), 20);
        assert!(first.merge(&second, 5).is_err());
    }

    #[test]
    fn test_validate_reports_inconsistency() {
        let mut partitions = Partitions::new();
        partitions.add_partition("a", PartitionSpan::Length(60)).unwrap();
        partitions.add_partition("b", PartitionSpan::Length(60)).unwrap();

        match partitions.validate(100) {
            Err(PartitionError::Inconsistent { partitions, alignment }) => {
                assert_eq!(partitions, 120);
                assert_eq!(alignment, 100);
            }
            other => panic!("expected inconsistency, got {:?}", other),
        }
        assert!(partitions.validate(120).is_ok());
    }

    #[test]
    fn test_single() {
        assert!(Partitions::single("all", 50).is_single());
        assert!(Partitions::single("empty", 0).is_empty());
    }

    #[test]
    fn test_read_nexus_charset() {
        let mut partitions = Partitions::new();
        partitions.read_from_nexus_charset("charset coi = 1-300;").unwrap();
        partitions.read_from_nexus_charset("CHARSET 'its' = 301 - 450 ;").unwrap();

        assert_eq!(partitions.names(), vec!["coi", "its"]);
        let its = partitions.get("its").unwrap();
        assert_eq!((its.start, its.end), (300, 449));
    }

    #[test]
    fn test_read_raxml_line() {
        let mut partitions = Partitions::new();
        partitions.read_from_raxml_line("GTR, coi = 1-300").unwrap();
        partitions.read_from_raxml_line("LG, rbcl = 301-400").unwrap();

        let rbcl = partitions.get("rbcl").unwrap();
        assert_eq!(rbcl.models, vec!["LG"]);
        assert_eq!((rbcl.start, rbcl.end), (300, 399));
        assert!(matches!(
            partitions.read_from_raxml_line("coi = 1-300"),
            Err(PartitionError::Malformed { .. })
        ));
    }

    #[test]
    fn test_codon_charsets_fold_into_one_partition() {
        let mut partitions = Partitions::new();
        partitions.read_from_nexus_charset("charset cds_1 = 1-99\\3;").unwrap();
        partitions.read_from_nexus_charset("charset cds_2 = 2-99\\3;").unwrap();
        partitions.read_from_nexus_charset("charset cds_3 = 3-99\\3;").unwrap();
        partitions.read_from_nexus_charset("charset utr = 100-120;").unwrap();

        assert_eq!(partitions.len(), 2);
        let cds = partitions.get("cds").unwrap();
        assert_eq!(cds.codon_positions, Some(vec![1, 2, 3]));
        assert_eq!((cds.start, cds.end), (0, 98));
        assert_eq!(
            partitions.get_partition_names(),
            vec!["cds_1", "cds_2", "cds_3", "utr"]
        );
        assert!(partitions.to_nexus_charset_text().contains("charset cds_2 = 2-99\\3;"));
    }

    #[test]
    fn test_dot_notation() {
        let mut partitions = Partitions::new();
        assert!(matches!(
            partitions.read_from_nexus_charset("charset all = 1-.;"),
            Err(PartitionError::DotNotationWithoutLength(_))
        ));

        let mut partitions = Partitions::with_length(80);
        partitions.read_from_nexus_charset("charset head = 1-30;").unwrap();
        partitions.read_from_nexus_charset("charset tail = 31-.;").unwrap();
        assert!(partitions.validate(80).is_ok());
    }

    #[test]
    fn test_serialisations() {
        let mut partitions = Partitions::new();
        partitions.add_partition("a", PartitionSpan::Length(10)).unwrap();
        partitions
            .add_partition("b", PartitionSpan::Length(5))
            .unwrap()
            .models
            .push("HKY".to_string());

        assert_eq!(partitions.to_raxml_text("GTR"), "GTR, a = 1-10\nHKY, b = 11-15\n");
        assert_eq!(
            partitions.to_nexus_charset_text(),
            "charset a = 1-10;\ncharset b = 11-15;\n"
        );
        assert_eq!(
            partitions.to_mrbayes_model_text(),
            "lset applyto=(2) nst=2;\nprset applyto=(2) statefreqpr=dirichlet(1,1,1,1);\n"
        );
    }

    #[test]
    fn test_remove_partition_repacks() {
        let mut partitions = Partitions::new();
        for (name, len) in [("a", 10), ("b", 5), ("c", 7)] {
            partitions
                .add_partition(name, PartitionSpan::Length(len))
                .unwrap()
                .source = Some(format!("{}.fas", name));
        }
        partitions.remove_partition("a").unwrap();
        let c = partitions.get("c").unwrap();
        assert_eq!((c.start, c.end), (5, 11));

        partitions.remove_file("b.fas");
        let c = partitions.get("c").unwrap();
        assert_eq!((c.start, c.end), (0, 6));
        assert_eq!(partitions.counter(), 7);
        assert!(partitions.remove_partition("zzz").is_err());
    }

    #[test]
    fn test_read_from_file_sorts_by_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheme.part");
        fs::write(&path, "DNA, second = 11-20\nDNA, first = 1-10\n").unwrap();

        let mut partitions = Partitions::new();
        partitions.read_from_file(&path).unwrap();
        assert_eq!(partitions.names(), vec!["first", "second"]);

        let nexus = dir.path().join("scheme.nex");
        fs::write(
            &nexus,
            "#NEXUS\nbegin sets;\ncharset x = 1-4;\ncharset y = 5-9;\nend;\n",
        )
        .unwrap();
        let mut partitions = Partitions::new();
        partitions.read_from_file(&nexus).unwrap();
        assert_eq!(partitions.counter(), 9);

        let junk = dir.path().join("junk.txt");
        fs::write(&junk, "hello world\n").unwrap();
        assert!(matches!(
            Partitions::new().read_from_file(&junk),
            Err(PartitionError::UnknownFormat)
        ));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let partitions = Partitions::single("locus", 12);
        let path = partitions
            .write_to_file(PartitionFormat::Raxml, dir.path().join("out"), "GTR")
            .unwrap();
        assert!(path.ends_with("out_part.File"));
        assert_eq!(fs::read_to_string(path).unwrap(), "GTR, locus = 1-12\n");
    }
}
