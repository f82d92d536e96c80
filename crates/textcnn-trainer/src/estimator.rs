//! Train / evaluate / predict lifecycle around [`TextCnn`], with
//! checkpoints in a model directory and self-contained exports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use textcnn_core::head::{self, EvalMetrics, MetricsAccumulator, Prediction};
use textcnn_core::serving::{PARAMS_FILE, VOCAB_FILE, WEIGHTS_FILE};
use textcnn_core::{InputFn, Mode, ModelParams, Schema, TextCnn, VocabTable};

const STATE_FILE: &str = "state.json";

/// Where and how the estimator runs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model_dir: PathBuf,
    pub vocab_path: PathBuf,
    /// Seed for input shuffling.
    pub seed: u64,
    pub log_every_n_steps: u64,
}

impl RunConfig {
    pub fn new(model_dir: impl Into<PathBuf>, vocab_path: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            vocab_path: vocab_path.into(),
            seed: 42,
            log_every_n_steps: 100,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_log_every_n_steps(mut self, n: u64) -> Self {
        self.log_every_n_steps = n.max(1);
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointState {
    global_step: u64,
}

/// Outcome of one [`Estimator::train`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub global_step: u64,
    /// Steps taken during this call.
    pub steps: u64,
    pub final_loss: f32,
    pub mean_loss: f32,
}

pub struct Estimator {
    config: RunConfig,
    params: ModelParams,
    table: VocabTable,
    varmap: VarMap,
    model: TextCnn,
    device: Device,
    global_step: u64,
}

impl Estimator {
    /// Build the model and restore the latest checkpoint in `model_dir`
    /// if there is one.
    pub fn new(config: RunConfig, params: ModelParams) -> Result<Self> {
        let table = VocabTable::from_file(&config.vocab_path, params.num_oov_buckets)
            .with_context(|| format!("failed to load vocabulary {:?}", config.vocab_path))?;
        if !table.has_pad_word() {
            warn!(vocab = ?config.vocab_path, "vocabulary does not start with the padding token");
        }
        if table.size() != params.n_words {
            anyhow::bail!(
                "vocabulary yields {} ids (lines + OOV buckets) but n_words is {}",
                table.size(),
                params.n_words
            );
        }
        params.validate()?;

        std::fs::create_dir_all(&config.model_dir)
            .with_context(|| format!("failed to create model dir {:?}", config.model_dir))?;

        let device = Device::Cpu;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = TextCnn::new(&params, vb)?;

        let mut global_step = 0;
        let weights = config.model_dir.join(WEIGHTS_FILE);
        if weights.exists() {
            varmap
                .load(&weights)
                .with_context(|| format!("failed to restore checkpoint {:?}", weights))?;
            global_step = read_state(&config.model_dir)?.global_step;
            info!(model_dir = ?config.model_dir, global_step, "restored checkpoint");
        } else {
            info!(model_dir = ?config.model_dir, "initialised new model");
        }

        Ok(Self {
            config,
            params,
            table,
            varmap,
            model,
            device,
            global_step,
        })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Train on `input` until it is exhausted or `steps` batches have run,
    /// then write a checkpoint.
    pub fn train(
        &mut self,
        input: &InputFn,
        schema: &Schema,
        steps: Option<u64>,
    ) -> Result<TrainSummary> {
        let batches = input.batches(schema, self.config.seed.wrapping_add(self.global_step))?;

        let adam = ParamsAdamW {
            lr: self.params.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), adam)?;

        let max_len = self.params.max_document_length;
        let mut taken = 0u64;
        let mut loss_sum = 0.0f32;
        let mut final_loss = 0.0f32;

        for batch in batches {
            if steps.is_some_and(|limit| taken >= limit) {
                break;
            }
            head::check_labels(&batch.labels)?;
            let (ids, labels) = batch.to_tensors(&self.table, max_len, &self.device)?;

            let logits = self.model.forward(&ids, Mode::Train)?;
            let loss = head::sigmoid_cross_entropy(&logits, &labels)?
                .add(&self.model.l2_penalty()?)?;
            optimizer.backward_step(&loss)?;

            final_loss = loss.to_scalar::<f32>()?;
            loss_sum += final_loss;
            taken += 1;
            self.global_step += 1;

            if self.global_step % self.config.log_every_n_steps == 0 {
                info!(step = self.global_step, loss = final_loss, "training");
            } else {
                debug!(step = self.global_step, loss = final_loss, batch = batch.len());
            }
        }

        if taken == 0 {
            warn!(path = ?input.path, "training input produced no batches");
        }

        self.save_checkpoint()?;

        let summary = TrainSummary {
            global_step: self.global_step,
            steps: taken,
            final_loss,
            mean_loss: if taken == 0 { 0.0 } else { loss_sum / taken as f32 },
        };
        info!(
            global_step = summary.global_step,
            steps = summary.steps,
            mean_loss = summary.mean_loss,
            "training finished"
        );
        Ok(summary)
    }

    /// Run one pass over `input` and compute head metrics. The input's
    /// repeat count is ignored.
    pub fn evaluate(&self, input: &InputFn, schema: &Schema) -> Result<EvalMetrics> {
        if input.repeat_count != Some(1) {
            debug!(repeat_count = ?input.repeat_count, "evaluating a single pass");
        }
        let input = input.clone().with_repeat_count(Some(1));
        let batches = input.batches(schema, self.config.seed)?;
        let mut metrics = MetricsAccumulator::new();
        for batch in batches {
            let (ids, _) =
                batch.to_tensors(&self.table, self.params.max_document_length, &self.device)?;
            let logits = self.model.forward(&ids, Mode::Eval)?;
            let logits = logits.flatten_all()?.to_vec1::<f32>()?;
            metrics.update(&logits, &batch.labels)?;
        }
        let result = metrics.finish();
        info!(
            global_step = self.global_step,
            accuracy = result.accuracy,
            auc = result.auc,
            loss = result.loss,
            "evaluation finished"
        );
        Ok(result)
    }

    pub fn predict<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self
            .table
            .encode_batch(texts, self.params.max_document_length, &self.device)?;
        let logits = self.model.forward(&ids, Mode::Predict)?;
        Ok(head::predictions(&logits)?)
    }

    /// Write weights, parameters and global step into the model directory.
    pub fn save_checkpoint(&self) -> Result<()> {
        let dir = &self.config.model_dir;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        self.params.save(dir.join(PARAMS_FILE))?;
        let state = CheckpointState {
            global_step: self.global_step,
        };
        std::fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(&state)?)?;
        debug!(model_dir = ?dir, global_step = self.global_step, "saved checkpoint");
        Ok(())
    }

    /// Write a directory loadable by [`textcnn_core::Predictor::load`].
    pub fn export<P: AsRef<Path>>(&self, export_dir: P) -> Result<PathBuf> {
        let dir = export_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create export dir {:?}", dir))?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        self.params.save(dir.join(PARAMS_FILE))?;
        std::fs::copy(&self.config.vocab_path, dir.join(VOCAB_FILE))
            .with_context(|| format!("failed to copy vocabulary {:?}", self.config.vocab_path))?;
        info!(export_dir = ?dir, global_step = self.global_step, "exported model");
        Ok(dir)
    }
}

fn read_state(model_dir: &Path) -> Result<CheckpointState> {
    let path = model_dir.join(STATE_FILE);
    if !path.exists() {
        return Ok(CheckpointState::default());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use textcnn_core::{PAD_WORD, Predictor, VocabBuilder};

    const ROWS: &[(&str, i32)] = &[
        ("great fun movie", 1),
        ("boring slow plot", 0),
        ("great acting fun", 1),
        ("slow and boring", 0),
        ("fun great ending", 1),
        ("plot was boring", 0),
    ];

    fn fixture(dir: &Path) -> (RunConfig, ModelParams, PathBuf) {
        let train = dir.join("train.tsv");
        let mut body = String::from("sentiment\treview\n");
        for (text, label) in ROWS {
            body.push_str(&format!("{label}\t{text}\n"));
        }
        std::fs::write(&train, body).unwrap();

        let vocab = VocabBuilder::default().build_from_rows(ROWS.iter().map(|(t, _)| *t));
        let vocab_path = dir.join("vocab.csv");
        vocab.write_vocab_file(&vocab_path).unwrap();

        let params = ModelParams::new(vocab.len() + 2)
            .with_max_document_length(5)
            .with_embedding_dims(vec![4, 8])
            .with_filter_sizes(vec![2, 3])
            .with_num_filters(4)
            .with_hidden_units(6);
        let config = RunConfig::new(dir.join("model"), vocab_path).with_log_every_n_steps(5);
        (config, params, train)
    }

    #[test]
    fn test_n_words_must_match_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let (config, params, _) = fixture(dir.path());
        let mut wrong = params.clone();
        wrong.n_words += 1;
        assert!(Estimator::new(config, wrong).is_err());
    }

    #[test]
    fn test_train_evaluate_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let (config, params, train) = fixture(dir.path());
        let input = InputFn::new(&train)
            .with_batch_size(2)
            .with_shuffle(true)
            .with_repeat_count(Some(4));
        let schema = Schema::default();

        let mut estimator = Estimator::new(config.clone(), params.clone()).unwrap();
        let summary = estimator.train(&input, &schema, None).unwrap();
        assert_eq!(summary.steps, 12);
        assert_eq!(summary.global_step, 12);
        assert!(summary.mean_loss.is_finite());

        let limited = estimator.train(&input, &schema, Some(3)).unwrap();
        assert_eq!(limited.steps, 3);
        assert_eq!(limited.global_step, 15);

        let metrics = estimator.evaluate(&InputFn::new(&train), &schema).unwrap();
        assert_eq!(metrics.examples, ROWS.len());
        assert!((0.0..=1.0).contains(&metrics.accuracy));

        let before = estimator.predict(&["great fun", "boring plot"]).unwrap();
        drop(estimator);

        let restored = Estimator::new(config, params).unwrap();
        assert_eq!(restored.global_step(), 15);
        let after = restored.predict(&["great fun", "boring plot"]).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a.logit - b.logit).abs() < 1e-5);
        }
    }

    #[test]
    fn test_evaluate_runs_one_pass_of_repeating_input() {
        let dir = tempfile::tempdir().unwrap();
        let (config, params, train) = fixture(dir.path());
        let estimator = Estimator::new(config, params).unwrap();
        let schema = Schema::default();

        let forever = InputFn::new(&train)
            .with_batch_size(4)
            .with_shuffle(true)
            .with_repeat_count(None);
        assert_eq!(estimator.evaluate(&forever, &schema).unwrap().examples, ROWS.len());

        let twice = InputFn::new(&train).with_repeat_count(Some(2));
        assert_eq!(estimator.evaluate(&twice, &schema).unwrap().examples, ROWS.len());
    }

    #[test]
    fn test_export_loads_into_predictor() {
        let dir = tempfile::tempdir().unwrap();
        let (config, params, _) = fixture(dir.path());
        let estimator = Estimator::new(config, params).unwrap();

        let export = estimator.export(dir.path().join("export")).unwrap();
        let predictor = Predictor::load(&export, Device::Cpu).unwrap();

        let texts = ["great fun movie", "never seen words"];
        let from_estimator = estimator.predict(&texts).unwrap();
        let from_predictor = predictor.predict(&texts).unwrap();
        assert_eq!(from_predictor.len(), 2);
        for (a, b) in from_estimator.iter().zip(&from_predictor) {
            assert!((a.logit - b.logit).abs() < 1e-5);
            assert_eq!(a.class_id, b.class_id);
        }
        let vocab = std::fs::read_to_string(export.join(VOCAB_FILE)).unwrap();
        assert_eq!(vocab.lines().next(), Some(PAD_WORD));
    }

    #[test]
    fn test_invalid_label_rejected_during_training() {
        let dir = tempfile::tempdir().unwrap();
        let (config, params, train) = fixture(dir.path());
        std::fs::write(&train, "sentiment\treview\n3\tgreat fun\n").unwrap();

        let mut estimator = Estimator::new(config, params).unwrap();
        assert!(estimator.train(&InputFn::new(&train), &Schema::default(), None).is_err());
    }
}
