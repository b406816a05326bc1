//! Alignment output.
//!
//! [`OutputFormat`] names every format an [`Alignment`] can be written to;
//! [`Alignment::write_to_file`] dispatches each requested format to its
//! writer with an exhaustive match. Side files (RAxML partitions, haplotype
//! correspondence) are written here as well.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::formats::{fasta, nexus, phylip};
use crate::model::{Alignment, AlignmentError, AlignmentResult};
use crate::partitions::PartitionFormat;

/// Residues per line in interleaved output.
pub const INTERLEAVE_WIDTH: usize = 90;

/// Formats an alignment can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Fasta,
    Phylip,
    Nexus,
    /// PHYLIP with one header block per partition.
    Mcmctree,
    /// IMa2 input, loci taken from partitions.
    Ima2,
}

impl OutputFormat {
    /// Appended to the output stem.
    pub fn suffix(self) -> &'static str {
        match self {
            OutputFormat::Fasta => ".fas",
            OutputFormat::Phylip => ".phy",
            OutputFormat::Nexus => ".nex",
            OutputFormat::Mcmctree => "_mcmctree.phy",
            OutputFormat::Ima2 => ".txt",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Fasta => write!(f, "FASTA"),
            OutputFormat::Phylip => write!(f, "PHYLIP"),
            OutputFormat::Nexus => write!(f, "NEXUS"),
            OutputFormat::Mcmctree => write!(f, "MCMCTree"),
            OutputFormat::Ima2 => write!(f, "IMa2"),
        }
    }
}

/// Taxon label layout: labels are cut to `cut` characters, then padded to
/// `pad` columns (always followed by at least one space).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelWidth {
    pub pad: usize,
    pub cut: usize,
}

impl LabelWidth {
    pub fn truncate<'a>(&self, label: &'a str) -> &'a str {
        match label.char_indices().nth(self.cut) {
            Some((end, _)) => &label[..end],
            None => label,
        }
    }

    pub fn format(&self, label: &str) -> String {
        let label = self.truncate(label);
        let width = self.pad.max(label.chars().count() + 1);
        format!("{:<width$}", label, width = width)
    }
}

/// Population assignment and model settings for IMa2 output.
#[derive(Debug, Clone, Default)]
pub struct Ima2Params {
    /// `(taxon, population)` pairs, in file order.
    pub populations: Vec<(String, String)>,
    /// Population tree, e.g. `(0,1):2`.
    pub tree: String,
    /// Mutation model code (`I`, `H`, `S`, `J`).
    pub mutational_model: String,
    /// Inheritance scalar.
    pub inheritance: String,
}

impl Ima2Params {
    /// Reads a population file with one `TAXON POPULATION` pair per line,
    /// separated by whitespace, `;` or `,`.
    pub fn from_population_file<P: AsRef<Path>>(
        path: P,
        tree: &str,
        mutational_model: &str,
        inheritance: &str,
    ) -> AlignmentResult<Self> {
        let content = fs::read_to_string(&path)?;
        let mut populations = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line
                .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .collect();
            match fields.as_slice() {
                [taxon, population] => {
                    populations.push((taxon.to_string(), population.to_string()))
                }
                _ => {
                    return Err(AlignmentError::OutputFormat(format!(
                        "population file {}: expected 'TAXON POPULATION', got '{}'",
                        path.as_ref().display(),
                        line
                    )))
                }
            }
        }
        Ok(Self {
            populations,
            tree: tree.to_string(),
            mutational_model: mutational_model.to_string(),
            inheritance: inheritance.to_string(),
        })
    }

    /// Population names in order of first appearance.
    pub fn population_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (_, population) in &self.populations {
            if !names.contains(&population.as_str()) {
                names.push(population);
            }
        }
        names
    }
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Interleaved NEXUS / wrapped FASTA.
    pub interleave: bool,
    /// RAxML model for partitions without one (default: GTR or LG).
    pub model: Option<String>,
    /// Outgroup taxa for the NEXUS MrBayes block.
    pub outgroups: Vec<String>,
    /// Write charsets and partitions in NEXUS output.
    pub use_charset: bool,
    /// Write `lset`/`prset` model lines in NEXUS output.
    pub use_nexus_models: bool,
    /// Write the RAxML partition file next to PHYLIP output.
    pub partition_file: bool,
    /// Cut PHYLIP labels to 10 characters.
    pub phylip_truncate: bool,
    pub nexus_label: LabelWidth,
    pub phylip_label: LabelWidth,
    pub ima2_label: LabelWidth,
    pub ima2: Option<Ima2Params>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            interleave: false,
            model: None,
            outgroups: Vec::new(),
            use_charset: true,
            use_nexus_models: true,
            partition_file: true,
            phylip_truncate: false,
            nexus_label: LabelWidth { pad: 40, cut: 50 },
            phylip_label: LabelWidth { pad: 30, cut: 258 },
            ima2_label: LabelWidth { pad: 10, cut: 8 },
            ima2: None,
        }
    }
}

impl WriteOptions {
    /// PHYLIP label layout, honouring `phylip_truncate`.
    pub fn phylip_columns(&self) -> LabelWidth {
        if self.phylip_truncate {
            LabelWidth { pad: 11, cut: 10 }
        } else {
            self.phylip_label
        }
    }
}

/// `stem` with `suffix` appended to its file name.
pub(crate) fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl Alignment {
    /// Writes the alignment in every requested format and returns the
    /// created files, side files included.
    pub fn write_to_file<P: AsRef<Path>>(
        &self,
        formats: &[OutputFormat],
        stem: P,
        options: &WriteOptions,
    ) -> AlignmentResult<Vec<PathBuf>> {
        let stem = stem.as_ref();
        if !self.is_alignment && formats.iter().any(|f| *f != OutputFormat::Fasta) {
            return Err(AlignmentError::NotAnAlignment(self.name.clone()));
        }
        if self.restriction_range.is_some() {
            if let Some(format) = formats.iter().find(|f| **f != OutputFormat::Nexus) {
                return Err(AlignmentError::OutputFormat(format!(
                    "'{}' is gap-coded and can only be written as NEXUS, not {}",
                    self.name, format
                )));
            }
        }
        if formats.contains(&OutputFormat::Ima2) && options.ima2.is_none() {
            return Err(AlignmentError::OutputFormat(
                "IMa2 output requires a population file, a population tree, a mutational model and an inheritance scalar"
                    .to_string(),
            ));
        }

        let mut written = Vec::new();
        for &format in formats {
            let path = with_suffix(stem, format.suffix());
            let mut out = BufWriter::new(File::create(&path)?);
            match format {
                OutputFormat::Fasta => fasta::write_fasta(self, &mut out, options)?,
                OutputFormat::Phylip => phylip::write_phylip(self, &mut out, options)?,
                OutputFormat::Nexus => nexus::write_nexus(self, &mut out, options)?,
                OutputFormat::Mcmctree => phylip::write_mcmctree(self, &mut out, options)?,
                OutputFormat::Ima2 => write_ima2(self, &mut out, options)?,
            }
            out.flush()?;
            debug!("Wrote {} as {} to {}", self.name, format, path.display());
            written.push(path);

            if format == OutputFormat::Phylip
                && options.partition_file
                && !self.partitions().is_single()
            {
                let model = options
                    .model
                    .as_deref()
                    .unwrap_or_else(|| self.sequence_code.default_model());
                written.push(self.partitions().write_to_file(PartitionFormat::Raxml, stem, model)?);
            }
        }
        Ok(written)
    }
}

/// Writes IMa2 input: one locus per partition, taxa grouped by population.
///
/// Taxa with only missing data in a locus are left out of that locus and of
/// its per-population counts.
pub fn write_ima2<W: Write>(
    alignment: &Alignment,
    out: &mut W,
    options: &WriteOptions,
) -> AlignmentResult<()> {
    let params = options.ima2.as_ref().ok_or_else(|| {
        AlignmentError::OutputFormat("IMa2 output requires population settings".to_string())
    })?;
    let populations = params.population_names();
    let label = options.ima2_label;

    let groups: Vec<Vec<&str>> = populations
        .iter()
        .map(|population| {
            params
                .populations
                .iter()
                .filter(|(taxon, p)| p == population && alignment.contains_taxon(taxon))
                .map(|(taxon, _)| taxon.as_str())
                .collect()
        })
        .collect();
    for taxon in alignment.taxa() {
        if !params.populations.iter().any(|(t, _)| t == taxon) {
            warn!("Taxon '{}' has no population and is left out of the IMa2 file", taxon);
        }
    }

    let rows = alignment.load_rows()?;
    let rows_by_taxon: HashMap<&str, &[u8]> = alignment
        .taxa()
        .iter()
        .map(String::as_str)
        .zip(rows.iter().map(Vec::as_slice))
        .collect();

    let missing = alignment.sequence_code.missing as u8;
    writeln!(out, "Input file for IMa2 using {} alignments", alignment.partitions().len())?;
    writeln!(out, "{}", populations.len())?;
    writeln!(out, "{}", populations.join(" "))?;
    writeln!(out, "{}", params.tree)?;
    writeln!(out, "{}", alignment.partitions().len())?;

    for partition in alignment.partitions().iter() {
        let locus: Vec<Vec<(&str, &[u8])>> = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|taxon| {
                        let row = rows_by_taxon.get(taxon).copied().unwrap_or_default();
                        (*taxon, row.get(partition.start..=partition.end).unwrap_or_default())
                    })
                    .filter(|(_, slice)| slice.iter().any(|&b| b != missing))
                    .collect()
            })
            .collect();
        let counts: Vec<String> = locus.iter().map(|g| g.len().to_string()).collect();
        writeln!(
            out,
            "{} {} {} {} {}",
            partition.name,
            counts.join(" "),
            partition.len(),
            params.mutational_model,
            params.inheritance
        )?;
        for (taxon, slice) in locus.iter().flatten() {
            let residues = String::from_utf8_lossy(slice).to_uppercase();
            writeln!(out, "{}{}", label.format(taxon), residues)?;
        }
    }
    Ok(())
}

/// Writes `HAPLOTYPE: taxon1; taxon2` lines, as produced by collapsing.
pub fn write_haplotypes<P: AsRef<Path>>(
    haplotypes: &[(String, Vec<String>)],
    path: P,
) -> AlignmentResult<()> {
    let mut out = BufWriter::new(File::create(&path)?);
    for (haplotype, taxa) in haplotypes {
        writeln!(out, "{}: {}", haplotype, taxa.join("; "))?;
    }
    out.flush()?;
    Ok(())
}
