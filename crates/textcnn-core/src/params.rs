//! Hyper-parameters of the classifier, persisted as `params.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TextCnnError};

/// Model hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Rows in every embedding table (vocabulary lines plus OOV buckets).
    pub n_words: usize,
    /// Documents are truncated or padded to this many tokens.
    pub max_document_length: usize,
    /// Output width of each parallel embedding table.
    pub embedding_dims: Vec<usize>,
    /// Convolution widths applied to every embedding.
    pub filter_sizes: Vec<usize>,
    /// Filters per convolution branch.
    pub num_filters: usize,
    /// Drop rate applied to the pooled features during training.
    pub dropout: f32,
    pub hidden_units: usize,
    /// L2 scale on the hidden dense kernel.
    pub l2_scale: f32,
    pub learning_rate: f64,
    pub num_oov_buckets: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_words: 0,
            max_document_length: 100,
            embedding_dims: vec![50, 100, 150, 200, 250],
            filter_sizes: vec![3, 5],
            num_filters: 16,
            dropout: 0.5,
            hidden_units: 128,
            l2_scale: 0.01,
            learning_rate: 0.001,
            num_oov_buckets: 1,
        }
    }
}

impl ModelParams {
    /// Default parameters sized for a vocabulary of `n_words` ids.
    pub fn new(n_words: usize) -> Self {
        Self {
            n_words,
            ..Self::default()
        }
    }

    pub fn with_max_document_length(mut self, len: usize) -> Self {
        self.max_document_length = len;
        self
    }

    pub fn with_embedding_dims(mut self, dims: Vec<usize>) -> Self {
        self.embedding_dims = dims;
        self
    }

    pub fn with_filter_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.filter_sizes = sizes;
        self
    }

    pub fn with_num_filters(mut self, n: usize) -> Self {
        self.num_filters = n;
        self
    }

    pub fn with_hidden_units(mut self, n: usize) -> Self {
        self.hidden_units = n;
        self
    }

    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate;
        self
    }

    /// Width of the concatenated pooled feature vector.
    pub fn pooled_features(&self) -> usize {
        self.embedding_dims.len() * self.filter_sizes.len() * self.num_filters
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(TextCnnError::InvalidParams(msg.to_string()));
        if self.n_words == 0 {
            return fail("n_words must be positive");
        }
        if self.max_document_length == 0 {
            return fail("max_document_length must be positive");
        }
        if self.embedding_dims.is_empty() || self.embedding_dims.contains(&0) {
            return fail("embedding_dims must be non-empty and positive");
        }
        if self.filter_sizes.is_empty() || self.filter_sizes.contains(&0) {
            return fail("filter_sizes must be non-empty and positive");
        }
        if self.num_filters == 0 || self.hidden_units == 0 {
            return fail("num_filters and hidden_units must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail("dropout must lie in [0, 1)");
        }
        if self.num_oov_buckets == 0 {
            return fail("num_oov_buckets must be at least 1");
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = ModelParams::new(1000);
        assert!(params.validate().is_ok());
        assert_eq!(params.pooled_features(), 5 * 2 * 16);
    }

    #[test]
    fn test_validation() {
        assert!(ModelParams::default().validate().is_err());
        assert!(ModelParams::new(10).with_dropout(1.0).validate().is_err());
        assert!(ModelParams::new(10).with_filter_sizes(vec![]).validate().is_err());
        assert!(ModelParams::new(10).with_embedding_dims(vec![8, 0]).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: ModelParams =
            serde_json::from_str(r#"{"n_words": 42, "filter_sizes": [2, 4]}"#).unwrap();
        assert_eq!(params.n_words, 42);
        assert_eq!(params.filter_sizes, vec![2, 4]);
        assert_eq!(params.num_filters, 16);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let params = ModelParams::new(7).with_num_filters(4);
        params.save(&path).unwrap();
        assert_eq!(ModelParams::load(&path).unwrap(), params);
    }
}
