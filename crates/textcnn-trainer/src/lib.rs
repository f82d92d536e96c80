//! # textcnn Trainer
//!
//! Estimator lifecycle (train, evaluate, predict, export) for the text CNN
//! and the jobs behind the `build-vocab` and `train` binaries.

pub mod estimator;
pub mod trainer;

pub use estimator::{Estimator, RunConfig, TrainSummary};
pub use trainer::{TrainJob, TrainReport, VocabJob, resolve_params, run_build_vocab, run_training};
