//! End-to-end jobs behind the command-line tools: building the
//! vocabulary files and running a train/evaluate/export cycle.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use textcnn_core::head::EvalMetrics;
use textcnn_core::{EmptyTokenPolicy, InputFn, ModelParams, Schema, VocabBuilder, VocabTable};

use crate::estimator::{Estimator, RunConfig, TrainSummary};

/// Inputs of the vocabulary job.
#[derive(Debug, Clone)]
pub struct VocabJob {
    pub input: PathBuf,
    pub column: String,
    pub delimiter: u8,
    pub policy: EmptyTokenPolicy,
    pub vocab_out: PathBuf,
    pub count_out: PathBuf,
}

/// Build the vocabulary and write both output files. Returns the
/// vocabulary size written to the count file.
pub fn run_build_vocab(job: &VocabJob) -> Result<usize> {
    if !job.input.exists() {
        bail!("Corpus not found: {}", job.input.display());
    }

    let vocab = VocabBuilder::new(job.column.clone())
        .with_delimiter(job.delimiter)
        .with_policy(job.policy)
        .build_from_path(&job.input)
        .with_context(|| format!("failed to build vocabulary from {}", job.input.display()))?;

    for out in [&job.vocab_out, &job.count_out] {
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    vocab.write_vocab_file(&job.vocab_out)?;
    vocab.write_count_file(&job.count_out)?;

    info!(
        words = vocab.len(),
        vocab = %job.vocab_out.display(),
        count = %job.count_out.display(),
        "vocabulary written"
    );
    Ok(vocab.len())
}

/// Inputs of the training job.
#[derive(Debug, Clone)]
pub struct TrainJob {
    pub train_file: PathBuf,
    pub eval_file: Option<PathBuf>,
    pub vocab: PathBuf,
    pub model_dir: PathBuf,
    pub params: Option<PathBuf>,
    pub max_document_length: Option<usize>,
    pub schema: Schema,
    pub batch_size: usize,
    pub epochs: usize,
    pub steps: Option<u64>,
    pub seed: u64,
    pub export_dir: Option<PathBuf>,
}

/// What a training job produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub train: TrainSummary,
    pub eval: Option<EvalMetrics>,
    pub export_dir: Option<PathBuf>,
}

/// Resolve hyper-parameters: an explicit file wins, otherwise defaults;
/// `n_words` left at zero is taken from the vocabulary table.
pub fn resolve_params(job: &TrainJob) -> Result<ModelParams> {
    let mut params = match &job.params {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read params {}", path.display()))?;
            serde_json::from_str::<ModelParams>(&content)
                .with_context(|| format!("failed to parse params {}", path.display()))?
        }
        None => ModelParams::default(),
    };
    if let Some(len) = job.max_document_length {
        params.max_document_length = len;
    }

    let table = VocabTable::from_file(&job.vocab, params.num_oov_buckets)
        .with_context(|| format!("failed to load vocabulary {}", job.vocab.display()))?;
    if params.n_words == 0 {
        params.n_words = table.size();
    }
    params.validate()?;
    Ok(params)
}

pub fn run_training(job: &TrainJob) -> Result<TrainReport> {
    if !job.train_file.exists() {
        bail!("Training data not found: {}", job.train_file.display());
    }

    let params = resolve_params(job)?;
    let config = RunConfig::new(&job.model_dir, &job.vocab).with_seed(job.seed);
    let mut estimator = Estimator::new(config, params)?;

    info!(
        train = %job.train_file.display(),
        epochs = job.epochs,
        batch_size = job.batch_size,
        "starting training"
    );
    let input = InputFn::new(&job.train_file)
        .with_batch_size(job.batch_size)
        .with_shuffle(true)
        .with_repeat_count(Some(job.epochs));
    let train = estimator.train(&input, &job.schema, job.steps)?;

    let eval = match &job.eval_file {
        Some(path) => {
            let input = InputFn::new(path).with_batch_size(job.batch_size);
            Some(estimator.evaluate(&input, &job.schema)?)
        }
        None => None,
    };

    let export_dir = match &job.export_dir {
        Some(dir) => Some(estimator.export(dir)?),
        None => None,
    };

    Ok(TrainReport {
        train,
        eval,
        export_dir,
    })
}
