//! # alnkit - Multiple Sequence Alignment Toolkit
//!
//! Loads alignments from FASTA, NEXUS, PHYLIP and loci files, combines them
//! (concatenation, reverse concatenation), filters and transforms them, and
//! writes them back out in the formats phylogenetic programs read.
//!
//! ## Architecture
//!
//! - `model`: sequence codes, raw sequences and the `Alignment` type
//! - `store`: where sequence data lives (memory or scratch files)
//! - `partitions`: named site ranges, their models and their file formats
//! - `formats`: format detection and one reader per input format
//! - `process`: transformations of a single alignment
//! - `output`: output formats and writers
//! - `alignment_list`: sets of alignments and the operations that span them

pub mod alignment_list;
pub mod formats;
pub mod model;
pub mod output;
pub mod partitions;
pub mod process;
pub mod store;
