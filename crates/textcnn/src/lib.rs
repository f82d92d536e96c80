//! # textcnn
//!
//! Vocabulary builder and convolutional text classifier. Re-exports the
//! core library and the trainer.

pub use textcnn_core;
pub use textcnn_trainer;

pub use textcnn_core::{
    EmptyTokenPolicy, ModelParams, Predictor, Schema, TextCnn, VocabBuilder, Vocabulary,
};
pub use textcnn_trainer::{Estimator, RunConfig};
