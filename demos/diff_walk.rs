use std::path::PathBuf;

use clap::Parser;
use streaming_iterator::StreamingIterator; // Required for diff iteration
use treeseq::{TreeDiffOptions, TreeSequence};

/// Walk the local-tree diffs of a stored tree sequence.
#[derive(Parser)]
struct Cli {
    /// Container file written by TreeSequence::dump
    treefile: PathBuf,
    /// Step per breakpoint pair instead of per distinct tree
    #[arg(long)]
    all_breakpoints: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ts = TreeSequence::load(&cli.treefile)?;
    println!(
        "{}: n = {}, L = {}, {} records, {} breakpoints",
        cli.treefile.display(),
        ts.sample_size(),
        ts.num_loci(),
        ts.num_records(),
        ts.num_breakpoints()
    );

    let options = if cli.all_breakpoints {
        TreeDiffOptions::ALL_BREAKPOINTS
    } else {
        TreeDiffOptions::empty()
    };
    let mut diffs = ts.tree_diff_iterator(options)?;
    let mut left = 0u32;
    while let Some(diff) = diffs.next() {
        let interval = format!("[{}, {})", left, left + diff.span());
        if diff.tree_changed() {
            let removed: Vec<String> = diff
                .nodes_out()
                .iter()
                .map(|node| node.id.to_string())
                .collect();
            let added: Vec<String> = diff
                .nodes_in()
                .iter()
                .map(|node| node.id.to_string())
                .collect();
            println!(
                "{interval}\t-{{{}}}\t+{{{}}}",
                removed.join(", "),
                added.join(", ")
            );
        } else {
            println!("{interval}\tunchanged");
        }
        left += diff.span();
    }
    if let Some(error) = diffs.error() {
        anyhow::bail!("iteration failed: {error}");
    }
    Ok(())
}
