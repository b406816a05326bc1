//! alnkit - Multiple Sequence Alignment Toolkit
//!
//! Converts, concatenates, splits and filters sequence alignments.
//!
//! ## Usage
//!
//! ```bash
//! alnkit -i gene1.fas gene2.nex -c -f nexus phylip -o dataset
//! alnkit -i dataset.phy -r dataset_part.File -f fasta
//! alnkit -i *.fas --missing-filter 25 50 --min-taxa 75 -f phylip --suffix _filtered
//! ```
//!
//! ## Supported Formats
//!
//! - Input: FASTA, NEXUS, PHYLIP (sequential), loci
//! - Output: FASTA, NEXUS, PHYLIP, MCMCTree, IMa2
//!
//! Logging goes to stderr; set `RUST_LOG=debug` for per-file details.

// Use jemalloc for better memory management (returns memory to OS)
#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use alnkit::alignment_list::AlignmentList;
use alnkit::formats::{FileFormat, ParseOptions};
use alnkit::model::{Alignment, TaxaMode};
use alnkit::output::{write_haplotypes, Ima2Params, OutputFormat, WriteOptions};
use alnkit::partitions::Partitions;
use alnkit::process::ConsensusMode;
use alnkit::store::StorageBackend;

/// Input format specification for command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    /// FASTA format
    Fasta,
    /// NEXUS format
    Nexus,
    /// Sequential PHYLIP format
    Phylip,
    /// pyRAD loci format
    Loci,
    /// Auto-detect from content
    Auto,
}

impl From<FormatArg> for Option<FileFormat> {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Fasta => Some(FileFormat::Fasta),
            FormatArg::Nexus => Some(FileFormat::Nexus),
            FormatArg::Phylip => Some(FileFormat::Phylip),
            FormatArg::Loci => Some(FileFormat::Loci),
            FormatArg::Auto => None,
        }
    }
}

/// Output format specification for command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputArg {
    Fasta,
    Nexus,
    Phylip,
    /// PHYLIP with one block per partition
    Mcmctree,
    /// IMa2 input (requires --ima2)
    Ima2,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Fasta => OutputFormat::Fasta,
            OutputArg::Nexus => OutputFormat::Nexus,
            OutputArg::Phylip => OutputFormat::Phylip,
            OutputArg::Mcmctree => OutputFormat::Mcmctree,
            OutputArg::Ima2 => OutputFormat::Ima2,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConsensusArg {
    Iupac,
    SoftMask,
    Remove,
    FirstSequence,
}

impl From<ConsensusArg> for ConsensusMode {
    fn from(arg: ConsensusArg) -> Self {
        match arg {
            ConsensusArg::Iupac => ConsensusMode::Iupac,
            ConsensusArg::SoftMask => ConsensusMode::SoftMask,
            ConsensusArg::Remove => ConsensusMode::Remove,
            ConsensusArg::FirstSequence => ConsensusMode::FirstSequence,
        }
    }
}

/// alnkit - Convert, concatenate, split and filter sequence alignments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input alignment files (FASTA, NEXUS, PHYLIP or loci)
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Force the input format (overrides auto-detection)
    #[arg(long = "format", value_enum, default_value = "auto")]
    format: FormatArg,

    /// Output formats
    #[arg(short = 'f', long = "output-format", value_enum, num_args = 1.., default_value = "nexus")]
    output_format: Vec<OutputArg>,

    /// Output name for concatenated or single-file consensus output
    #[arg(short = 'o', long = "output", default_value = "concatenated")]
    output: String,

    /// Directory for every output file
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Suffix appended to each alignment name when writing one file per alignment
    #[arg(long = "suffix", default_value = "")]
    suffix: String,

    /// Concatenate all input alignments into one
    #[arg(short = 'c', long = "concatenate", conflicts_with = "reverse")]
    concatenate: bool,

    /// Split a single input alignment using a partition file (RAxML or NEXUS charsets)
    #[arg(short = 'r', long = "reverse", value_name = "PARTITION_FILE")]
    reverse: Option<PathBuf>,

    /// Binary gap coding (NEXUS output only)
    #[arg(long = "gap-coding")]
    gap_coding: bool,

    /// Collapse identical sequences into haplotypes named PREFIX_n
    #[arg(
        long = "collapse",
        value_name = "PREFIX",
        num_args = 0..=1,
        default_missing_value = "Hap"
    )]
    collapse: Option<String>,

    /// Replace each alignment by its consensus sequence
    #[arg(long = "consensus", value_enum)]
    consensus: Option<ConsensusArg>,

    /// Write all consensus sequences to a single file
    #[arg(long = "consensus-single-file", requires = "consensus")]
    consensus_single_file: bool,

    /// Remove columns above these gap and missing data percentages
    #[arg(long = "missing-filter", num_args = 2, value_names = ["GAP", "MISSING"])]
    missing_filter: Option<Vec<f64>>,

    /// Drop alignments with fewer than this percentage of all taxa
    #[arg(long = "min-taxa", value_name = "PERCENT")]
    min_taxa: Option<f64>,

    /// Codon positions to keep (1, 2 and/or 3)
    #[arg(long = "codon", num_args = 1..=3, value_parser = clap::value_parser!(u8).range(1..=3))]
    codon: Option<Vec<u8>>,

    /// Taxa to remove from every alignment
    #[arg(long = "remove-taxa", num_args = 1..)]
    remove_taxa: Vec<String>,

    /// Interleaved NEXUS and wrapped FASTA output
    #[arg(long = "interleave")]
    interleave: bool,

    /// Outgroup taxa written to the NEXUS MrBayes block
    #[arg(long = "outgroup", num_args = 1..)]
    outgroup: Vec<String>,

    /// RAxML model for partitions without one (default: GTR or LG)
    #[arg(long = "model")]
    model: Option<String>,

    /// Cut PHYLIP taxon names to 10 characters
    #[arg(long = "phylip-truncate")]
    phylip_truncate: bool,

    /// IMa2 settings: population file, population tree, mutational model, inheritance scalar
    #[arg(long = "ima2", num_args = 4, value_names = ["POPULATIONS", "TREE", "MODEL", "SCALAR"])]
    ima2: Option<Vec<String>>,

    /// Keep sequence data in scratch files instead of memory
    #[arg(long = "disk-store")]
    disk_store: bool,
}

/// Single-alignment transformations, in pipeline order.
fn transform_alignment(alignment: &mut Alignment, args: &Args) -> Result<()> {
    if let Some(prefix) = &args.collapse {
        let haplotypes = alignment.collapse(prefix)?;
        let path = args.output_dir.join(format!("{}.haplotypes", alignment.name));
        write_haplotypes(&haplotypes, &path)?;
        info!("Wrote haplotype correspondence to {}", path.display());
    }
    if let Some(mode) = args.consensus {
        alignment.consensus(mode.into())?;
    }
    if args.gap_coding {
        alignment.code_gaps()?;
    }
    Ok(())
}

fn write_options(args: &Args) -> Result<WriteOptions> {
    let ima2 = match &args.ima2 {
        Some(values) => match values.as_slice() {
            [populations, tree, model, scalar] => Some(
                Ima2Params::from_population_file(populations, tree, model, scalar)
                    .with_context(|| format!("Reading population file {}", populations))?,
            ),
            _ => bail!("--ima2 takes four values"),
        },
        None => None,
    };
    Ok(WriteOptions {
        interleave: args.interleave,
        model: args.model.clone(),
        outgroups: args.outgroup.clone(),
        phylip_truncate: args.phylip_truncate,
        ima2,
        ..WriteOptions::default()
    })
}

fn load(args: &Args) -> Result<AlignmentList> {
    let storage = if args.disk_store {
        StorageBackend::disk().context("Creating scratch directory")?
    } else {
        StorageBackend::Memory
    };
    let options = ParseOptions {
        format: args.format.into(),
        sequence_code: None,
        storage,
    };

    let list = AlignmentList::from_files(&args.input, options);
    for (path, reason) in &list.bad_alignments {
        warn!("Skipped {}: {}", path.display(), reason);
    }
    if list.is_empty() {
        bail!("No valid alignment among {} input file(s)", args.input.len());
    }
    Ok(list)
}

fn split(list: AlignmentList, partition_file: &Path) -> Result<AlignmentList> {
    let Some(source) = list.alignments().first() else {
        bail!("Nothing to split");
    };
    let mut partitions = Partitions::with_length(source.data_length());
    partitions
        .read_from_file(partition_file)
        .with_context(|| format!("Reading partition file {}", partition_file.display()))?;
    Ok(list.reverse_concatenate(Some(&partitions))?)
}

fn run(args: &Args) -> Result<()> {
    let mut list = load(args)?;
    if let Some(partition_file) = &args.reverse {
        list = split(list, partition_file)?;
    }

    if let Some(percent) = args.min_taxa {
        list.filter_min_taxa(percent);
    }
    if !args.remove_taxa.is_empty() {
        list.remove_taxa(&args.remove_taxa, TaxaMode::Remove)?;
    }
    if let Some(positions) = &args.codon {
        let mut keep = [false; 3];
        for &p in positions {
            keep[usize::from(p) - 1] = true;
        }
        list.filter_codon_positions(keep)?;
    }
    if let Some(thresholds) = &args.missing_filter {
        list.filter_missing_data(thresholds[0], thresholds[1])?;
    }
    if list.is_empty() {
        bail!("No alignment left after filtering");
    }

    let formats: Vec<OutputFormat> = args.output_format.iter().map(|&f| f.into()).collect();
    let options = write_options(args)?;
    let stem = args.output_dir.join(&args.output);

    let written = if args.concatenate {
        let mut alignment = list.concatenate(&args.output)?;
        transform_alignment(&mut alignment, args)?;
        alignment.write_to_file(&formats, &stem, &options)?
    } else if let (Some(mode), true) = (args.consensus, args.consensus_single_file) {
        let consensus = list.consensus(mode.into(), true)?;
        match consensus {
            Some(alignment) => alignment.write_to_file(&formats, &stem, &options)?,
            None => Vec::new(),
        }
    } else {
        if let Some(prefix) = &args.collapse {
            list.collapse(prefix, Some(&args.output_dir))?;
        }
        if let Some(mode) = args.consensus {
            list.consensus(mode.into(), false)?;
        }
        if args.gap_coding {
            list.code_gaps()?;
        }
        list.write_to_file(&formats, &args.output_dir, &args.suffix, &options)?
    };

    info!("Wrote {} file(s) to {}", written.len(), args.output_dir.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.reverse.is_some() && args.input.len() != 1 {
        bail!("Reverse concatenation needs exactly one input file (got {})", args.input.len());
    }
    if args.gap_coding && args.output_format.iter().any(|f| !matches!(f, OutputArg::Nexus)) {
        bail!("Gap coding can only be written in NEXUS format");
    }

    run(&args)
}
