//! # textcnn core
//!
//! Vocabulary building, the file-based input pipeline and the multi-width
//! convolutional text classifier, composed from candle layers.
//!
//! ## Quick Start
//!
//! ```rust
//! use textcnn_core::vocab::VocabBuilder;
//!
//! let vocab = VocabBuilder::default().build_from_rows(["the cat sat", "the dog ran"]);
//! assert_eq!(vocab.len(), 5);
//! assert!(vocab.contains("dog"));
//! ```
pub mod error;
pub mod head;
pub mod input;
pub mod lookup;
pub mod model;
pub mod params;
pub mod serving;
pub mod vocab;

// Re-export primary API
pub use error::{Result, TextCnnError};
pub use head::{EvalMetrics, MetricsAccumulator, Prediction};
pub use input::{Batch, Batches, Dataset, Example, InputFn, Schema};
pub use lookup::{PAD_ID, VocabTable};
pub use model::{Mode, TextCnn};
pub use params::ModelParams;
pub use serving::{Predictor, ServingReceiver};
pub use vocab::{EmptyTokenPolicy, PAD_WORD, VocabBuilder, Vocabulary};
