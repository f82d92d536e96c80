use std::path::PathBuf;

use clap::Parser;
use textcnn_core::EmptyTokenPolicy;
use textcnn_trainer::{VocabJob, run_build_vocab};

/// Build the vocabulary and word-count files from a CSV corpus.
#[derive(Parser)]
#[command(name = "build-vocab")]
#[command(about = "Derive the classifier vocabulary from a CSV text column")]
#[command(version)]
struct Cli {
    /// CSV corpus with a header row
    #[arg(short, long, default_value = "dataset/trainpreprocess.csv")]
    input: PathBuf,

    /// Name of the text column
    #[arg(short, long, default_value = "review")]
    column: String,

    /// Field delimiter
    #[arg(short, long, default_value_t = ',')]
    delimiter: char,

    /// Vocabulary output, one token per line after the padding token
    #[arg(long, default_value = "dataset/vocab.csv")]
    vocab_out: PathBuf,

    /// Word-count output
    #[arg(long, default_value = "dataset/nwords.csv")]
    count_out: PathBuf,

    /// Keep the empty token produced by empty cells and repeated spaces
    #[arg(long)]
    keep_empty: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if !cli.delimiter.is_ascii() {
        eprintln!("delimiter must be a single ASCII character");
        std::process::exit(2);
    }

    let job = VocabJob {
        input: cli.input,
        column: cli.column,
        delimiter: cli.delimiter as u8,
        policy: if cli.keep_empty {
            EmptyTokenPolicy::Retain
        } else {
            EmptyTokenPolicy::Drop
        },
        vocab_out: cli.vocab_out,
        count_out: cli.count_out,
    };

    if let Err(e) = run_build_vocab(&job) {
        eprintln!("Vocabulary build failed: {:#}", e);
        std::process::exit(1);
    }
}
