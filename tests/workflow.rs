use std::fs;
use std::path::Path;

use alnkit::alignment_list::AlignmentList;
use alnkit::formats::{parse_file, FileFormat, ParseOptions};
use alnkit::output::{OutputFormat, WriteOptions};
use alnkit::partitions::Partitions;
use alnkit::store::{ScratchDir, StorageBackend};

const GENE_A: &str = ">human\nACGTACGTAC\n>chimp\nACGTACGTTC\n>gorilla\nACGAACGTAC\n";

const GENE_B: &str = "#NEXUS
begin data;
  dimensions ntax=2 nchar=6;
  format datatype=dna gap=-;
  matrix
    chimp    CCGT-A
    orang    CCGTTA
  ;
end;
";

const GENE_C: &str = " 2 4\nhuman     TTGA\norang     TTGC\n";

fn write_inputs(dir: &Path) -> Vec<std::path::PathBuf> {
    let files = [("geneA.fas", GENE_A), ("geneB.nex", GENE_B), ("geneC.phy", GENE_C)];
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

fn run_round_trip(storage: StorageBackend) {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let options = ParseOptions {
        storage,
        ..ParseOptions::default()
    };

    let list = AlignmentList::from_files(&inputs, options.clone());
    assert_eq!(list.names(), vec!["geneA", "geneB", "geneC"]);
    assert_eq!(list.taxa_names(), &["human", "chimp", "gorilla", "orang"]);

    let concatenated = list.concatenate("supermatrix").unwrap();
    assert_eq!(concatenated.locus_length(), 20);
    assert_eq!(concatenated.sequence("orang").unwrap(), "nnnnnnnnnnccgttattgc");
    assert_eq!(concatenated.sequence("gorilla").unwrap(), "acgaacgtacnnnnnnnnnn");

    let stem = dir.path().join("supermatrix");
    let formats = [OutputFormat::Phylip, OutputFormat::Nexus];
    let written = concatenated
        .write_to_file(&formats, &stem, &WriteOptions::default())
        .unwrap();
    assert_eq!(written.len(), 3);
    let part_file = dir.path().join("supermatrix_part.File");
    assert_eq!(
        fs::read_to_string(&part_file).unwrap(),
        "GTR, geneA = 1-10\nGTR, geneB = 11-16\nGTR, geneC = 17-20\n"
    );

    // Split the written PHYLIP back into loci with the side file.
    let reloaded = parse_file(dir.path().join("supermatrix.phy"), &options).unwrap();
    assert_eq!(reloaded.input_format, Some(FileFormat::Phylip));
    let single = AlignmentList::from_alignments(vec![reloaded], options.clone()).unwrap();
    let mut partitions = Partitions::with_length(20);
    partitions.read_from_file(&part_file).unwrap();
    let split = single.reverse_concatenate(Some(&partitions)).unwrap();

    let gene_b = split.retrieve_alignment("geneB").unwrap();
    assert_eq!(gene_b.taxa(), &["chimp", "orang"]);
    assert_eq!(gene_b.sequence("chimp").unwrap(), "ccgt-a");
    let gene_c = split.retrieve_alignment("geneC").unwrap();
    assert_eq!(gene_c.taxa(), &["human", "orang"]);
    assert_eq!(gene_c.sequence("orang").unwrap(), "ttgc");
}

#[test]
fn test_round_trip_in_memory() {
    run_round_trip(StorageBackend::Memory);
}

#[test]
fn test_round_trip_on_disk() {
    let parent = tempfile::tempdir().unwrap();
    run_round_trip(StorageBackend::Disk(ScratchDir::new_in(parent.path()).unwrap()));
}

#[test]
fn test_filter_and_write_each_alignment() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let mut list = AlignmentList::from_files(&inputs, ParseOptions::default());

    list.filter_min_taxa(60.0);
    assert_eq!(list.names(), vec!["geneA"]);

    list.filter_missing_data(0.0, 0.0).unwrap();
    let out_dir = dir.path().join("out");
    fs::create_dir(&out_dir).unwrap();
    let written = list
        .write_to_file(&[OutputFormat::Fasta], &out_dir, "_clean", &WriteOptions::default())
        .unwrap();
    assert_eq!(written, vec![out_dir.join("geneA_clean.fas")]);

    let reloaded = parse_file(&written[0], &ParseOptions::default()).unwrap();
    assert_eq!(reloaded.taxa_count(), 3);
    assert_eq!(reloaded.sequence("chimp").unwrap(), "acgtacgttc");
}

#[test]
fn test_gap_coded_output_is_nexus_only() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path());
    let mut list = AlignmentList::from_files(&inputs[1..2], ParseOptions::default());
    list.code_gaps().unwrap();

    let coded = &list.alignments()[0];
    assert_eq!(coded.restriction_range, Some((6, 6)));
    assert!(list
        .write_to_file(&[OutputFormat::Fasta], dir.path(), "", &WriteOptions::default())
        .is_err());

    let written = list
        .write_to_file(&[OutputFormat::Nexus], dir.path(), "_coded", &WriteOptions::default())
        .unwrap();
    let text = fs::read_to_string(&written[0]).unwrap();
    assert!(text.contains("datatype=mixed(DNA:1-6,restriction:7-7)"));
    assert!(text.contains("charset gap_coding = 7-7;"));
}
