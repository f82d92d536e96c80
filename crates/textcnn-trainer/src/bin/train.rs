use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use textcnn_core::Schema;
use textcnn_trainer::{TrainJob, run_training};
use tracing::info;

/// Train, evaluate and export the text CNN classifier.
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train the multi-width CNN text classifier")]
#[command(version)]
struct Cli {
    /// Tab-separated training file with a header line
    #[arg(long, env = "TEXTCNN_TRAIN_FILE", default_value = "data/train.tsv")]
    train_file: PathBuf,

    /// Optional evaluation file, same layout as the training file
    #[arg(long, env = "TEXTCNN_EVAL_FILE")]
    eval_file: Option<PathBuf>,

    /// Vocabulary file produced by build-vocab
    #[arg(long, env = "TEXTCNN_VOCAB", default_value = "data/vocab.csv")]
    vocab: PathBuf,

    /// Checkpoint directory; training resumes from it when populated
    #[arg(long, env = "TEXTCNN_MODEL_DIR", default_value = "trained_models/textcnn")]
    model_dir: PathBuf,

    /// JSON file with model hyper-parameters
    #[arg(long, env = "TEXTCNN_PARAMS")]
    params: Option<PathBuf>,

    /// Override the document length from the parameters
    #[arg(long)]
    max_document_length: Option<usize>,

    /// Field delimiter of the data files
    #[arg(long, default_value_t = '\t')]
    delimiter: char,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Passes over the training file
    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// Stop after this many training steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Shuffle seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write a servable export here after training
    #[arg(long, env = "TEXTCNN_EXPORT_DIR")]
    export_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if !cli.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }

    let job = TrainJob {
        train_file: cli.train_file,
        eval_file: cli.eval_file,
        vocab: cli.vocab,
        model_dir: cli.model_dir,
        params: cli.params,
        max_document_length: cli.max_document_length,
        schema: Schema::default().with_delimiter(cli.delimiter as u8),
        batch_size: cli.batch_size,
        epochs: cli.epochs,
        steps: cli.max_steps,
        seed: cli.seed,
        export_dir: cli.export_dir,
    };

    let report = run_training(&job)?;
    info!(global_step = report.train.global_step, "done");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
