//! # Multi-Width Text CNN
//!
//! Several embedding tables of different widths look up the same word ids.
//! Every embedding is convolved with every filter width, each branch is
//! max-pooled over time, and the pooled features are concatenated and fed
//! through dropout and two dense layers down to a single logit.

use candle_core::{D, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, Linear, Module, VarBuilder};
use tracing::debug;

use crate::error::Result;
use crate::params::ModelParams;

/// Execution mode, selects training-only behaviour such as dropout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
    Predict,
}

impl Mode {
    pub fn is_training(self) -> bool {
        self == Mode::Train
    }
}

struct ConvBranch {
    embedding: usize,
    kernel_size: usize,
    conv: Conv1d,
}

impl ConvBranch {
    /// Zero-pad by `k - 1` on both sides, then apply a "same" convolution.
    fn padding(&self) -> (usize, usize) {
        let k = self.kernel_size;
        let same_left = (k - 1) / 2;
        let same_right = (k - 1) - same_left;
        (k - 1 + same_left, k - 1 + same_right)
    }

    /// `xs`: `[batch, channels, len]` -> `[batch, num_filters]`
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (left, right) = self.padding();
        let xs = xs.pad_with_zeros(D::Minus1, left, right)?;
        let xs = self.conv.forward(&xs)?.tanh()?;
        Ok(xs.max(D::Minus1)?)
    }
}

/// The convolutional text classifier.
pub struct TextCnn {
    embeddings: Vec<Embedding>,
    branches: Vec<ConvBranch>,
    hidden: Linear,
    output: Linear,
    dropout: f32,
    l2_scale: f32,
}

impl TextCnn {
    /// Create (or bind) all variables under `vb`.
    pub fn new(params: &ModelParams, vb: VarBuilder) -> Result<Self> {
        params.validate()?;

        let mut embeddings = Vec::with_capacity(params.embedding_dims.len());
        let mut branches = Vec::new();
        for (i, &dim) in params.embedding_dims.iter().enumerate() {
            embeddings.push(candle_nn::embedding(
                params.n_words,
                dim,
                vb.pp(format!("embedding_{i}")),
            )?);
            for &k in &params.filter_sizes {
                let conv = candle_nn::conv1d(
                    dim,
                    params.num_filters,
                    k,
                    Conv1dConfig::default(),
                    vb.pp(format!("conv_{i}_{k}")),
                )?;
                branches.push(ConvBranch {
                    embedding: i,
                    kernel_size: k,
                    conv,
                });
            }
        }

        let hidden = candle_nn::linear(
            params.pooled_features(),
            params.hidden_units,
            vb.pp("hidden"),
        )?;
        let output = candle_nn::linear(params.hidden_units, 1, vb.pp("logits"))?;

        debug!(
            embeddings = embeddings.len(),
            branches = branches.len(),
            pooled = params.pooled_features(),
            "built text cnn"
        );

        Ok(Self {
            embeddings,
            branches,
            hidden,
            output,
            dropout: params.dropout,
            l2_scale: params.l2_scale,
        })
    }

    /// `word_ids`: `[batch, max_document_length]` u32 -> logits `[batch, 1]`.
    pub fn forward(&self, word_ids: &Tensor, mode: Mode) -> Result<Tensor> {
        let mut embedded = Vec::with_capacity(self.embeddings.len());
        for embedding in &self.embeddings {
            // [batch, len, dim] -> [batch, dim, len]
            embedded.push(embedding.forward(word_ids)?.transpose(1, 2)?.contiguous()?);
        }

        let mut pooled = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            pooled.push(branch.forward(&embedded[branch.embedding])?);
        }
        let merged = Tensor::cat(&pooled, 1)?;

        let merged = if mode.is_training() && self.dropout > 0.0 {
            candle_nn::ops::dropout(&merged, self.dropout)?
        } else {
            merged
        };

        let hidden = self.hidden.forward(&merged)?.relu()?;
        Ok(self.output.forward(&hidden)?)
    }

    /// `l2_scale * sum(w^2)` over the hidden dense kernel.
    pub fn l2_penalty(&self) -> Result<Tensor> {
        Ok(self
            .hidden
            .weight()
            .sqr()?
            .sum_all()?
            .affine(f64::from(self.l2_scale), 0.0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_params() -> ModelParams {
        ModelParams::new(12)
            .with_max_document_length(6)
            .with_embedding_dims(vec![4, 6])
            .with_filter_sizes(vec![2, 3])
            .with_num_filters(3)
            .with_hidden_units(5)
    }

    #[test]
    fn test_branch_padding() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        for (k, expected) in [(1, (0, 0)), (3, (3, 3)), (5, (6, 6)), (4, (4, 5))] {
            let branch = ConvBranch {
                embedding: 0,
                kernel_size: k,
                conv: candle_nn::conv1d(2, 1, k, Conv1dConfig::default(), vb.pp(format!("c{k}")))
                    .unwrap(),
            };
            assert_eq!(branch.padding(), expected, "kernel {k}");
        }
    }

    #[test]
    fn test_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let params = small_params();
        let model = TextCnn::new(&params, vb).unwrap();

        let ids = Tensor::from_vec(vec![1u32, 2, 3, 0, 0, 0, 11, 4, 4, 4, 5, 6], (2, 6), &device)
            .unwrap();
        let logits = model.forward(&ids, Mode::Eval).unwrap();
        assert_eq!(logits.dims(), &[2, 1]);

        let train_logits = model.forward(&ids, Mode::Train).unwrap();
        assert_eq!(train_logits.dims(), &[2, 1]);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = TextCnn::new(&small_params(), vb).unwrap();

        let ids = Tensor::from_vec(vec![3u32, 1, 4, 1, 5, 9], (1, 6), &device).unwrap();
        let a = model.forward(&ids, Mode::Predict).unwrap().to_vec2::<f32>().unwrap();
        let b = model.forward(&ids, Mode::Predict).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_l2_penalty_zero_for_zero_weights() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = TextCnn::new(&small_params(), vb).unwrap();
        let penalty = model.l2_penalty().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(penalty, 0.0);
    }
}
