//! # Serving
//!
//! Raw-text inference against an exported model directory. The receiver
//! accepts plain review strings and produces the padded id tensor the
//! model consumes.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::info;

use crate::error::{Result, TextCnnError};
use crate::head::{self, Prediction};
use crate::lookup::VocabTable;
use crate::model::{Mode, TextCnn};
use crate::params::ModelParams;

/// Hyper-parameters inside a model or export directory.
pub const PARAMS_FILE: &str = "params.json";
/// Vocabulary copy inside an export directory.
pub const VOCAB_FILE: &str = "vocab.csv";
/// Safetensors weights inside a model or export directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Turns raw text into model features.
#[derive(Debug, Clone)]
pub struct ServingReceiver {
    table: VocabTable,
    max_document_length: usize,
}

impl ServingReceiver {
    pub fn new(table: VocabTable, max_document_length: usize) -> Self {
        Self {
            table,
            max_document_length,
        }
    }

    pub fn table(&self) -> &VocabTable {
        &self.table
    }

    /// `[texts.len(), max_document_length]` word ids.
    pub fn receive<S: AsRef<str>>(&self, texts: &[S], device: &Device) -> Result<Tensor> {
        self.table
            .encode_batch(texts, self.max_document_length, device)
    }
}

/// An exported model ready for inference.
pub struct Predictor {
    receiver: ServingReceiver,
    model: TextCnn,
    device: Device,
}

impl Predictor {
    /// Load `params.json`, `vocab.csv` and `model.safetensors` from `dir`.
    pub fn load<P: AsRef<Path>>(dir: P, device: Device) -> Result<Self> {
        let dir = dir.as_ref();
        let params = ModelParams::load(dir.join(PARAMS_FILE))?;
        let table = VocabTable::from_file(dir.join(VOCAB_FILE), params.num_oov_buckets)?;
        if table.size() != params.n_words {
            return Err(TextCnnError::InvalidParams(format!(
                "vocabulary yields {} ids but model expects {}",
                table.size(),
                params.n_words
            )));
        }

        let tensors = candle_core::safetensors::load(dir.join(WEIGHTS_FILE), &device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = TextCnn::new(&params, vb)?;

        info!(dir = %dir.display(), n_words = params.n_words, "loaded predictor");
        Ok(Self {
            receiver: ServingReceiver::new(table, params.max_document_length),
            model,
            device,
        })
    }

    pub fn predict<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.receiver.receive(texts, &self.device)?;
        let logits = self.model.forward(&ids, Mode::Predict)?;
        head::predictions(&logits)
    }
}
