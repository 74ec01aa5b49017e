use treeseq::{test_data, DumpOptions, TreeSequence};

/// Bit-identical across all six columns and the metadata attributes.
fn assert_stores_equal(a: &TreeSequence, b: &TreeSequence) {
    assert_eq!(a.sample_size(), b.sample_size());
    assert_eq!(a.num_loci(), b.num_loci());
    assert_eq!(a.num_breakpoints(), b.num_breakpoints());
    assert_eq!(a.breakpoints(), b.breakpoints());
    assert_eq!(a.num_records(), b.num_records());
    for j in 0..a.num_records() {
        let x = a.record(j).unwrap();
        let y = b.record(j).unwrap();
        assert_eq!(x.left, y.left);
        assert_eq!(x.right, y.right);
        assert_eq!(x.node, y.node);
        assert_eq!(x.children, y.children);
        assert_eq!(x.time.to_bits(), y.time.to_bits());
    }
}

fn round_trip(source: test_data::VecSource, options: DumpOptions) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.trees");
    let ts = TreeSequence::create_from(&source).unwrap();
    ts.dump(&path, options).unwrap();
    let reloaded = TreeSequence::load(&path).unwrap();
    assert_stores_equal(&ts, &reloaded);
}

#[test]
fn plain_round_trip() {
    round_trip(test_data::two_trees(), DumpOptions::empty());
}

#[test]
fn compressed_round_trip() {
    round_trip(test_data::two_trees(), DumpOptions::COMPRESS);
}

#[test]
fn three_tree_round_trip_both_codecs() {
    round_trip(test_data::three_trees(), DumpOptions::empty());
    round_trip(test_data::three_trees(), DumpOptions::COMPRESS);
}

#[test]
fn empty_round_trip() {
    round_trip(test_data::empty(10), DumpOptions::empty());
    round_trip(test_data::empty(10), DumpOptions::COMPRESS);
}

#[test]
fn reloaded_store_iterates_identically() {
    use streaming_iterator::StreamingIterator;
    use treeseq::TreeDiffOptions;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.trees");
    let ts = TreeSequence::create_from(&test_data::three_trees()).unwrap();
    ts.dump(&path, DumpOptions::COMPRESS).unwrap();
    let reloaded = TreeSequence::load(&path).unwrap();

    let mut a = ts.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
    let mut b = reloaded.tree_diff_iterator(TreeDiffOptions::empty()).unwrap();
    loop {
        match (a.next(), b.next()) {
            (Some(x), Some(y)) => {
                assert_eq!(x.span(), y.span());
                assert_eq!(x.nodes_in(), y.nodes_in());
                assert_eq!(x.nodes_out(), y.nodes_out());
            }
            (None, None) => break,
            _ => panic!("streams differ in length"),
        }
    }
}
