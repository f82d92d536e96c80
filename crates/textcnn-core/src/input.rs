//! # Input Pipeline
//!
//! File-based training input: a delimited text file with a header line is
//! decoded row by row against a positional [`Schema`], then shuffled,
//! batched and repeated.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, TextCnnError};
use crate::lookup::VocabTable;

/// Number of examples held by the shuffle buffer.
pub const SHUFFLE_BUFFER_SIZE: usize = 1000;

/// Positional column layout of a training file.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Column names in file order.
    pub headers: Vec<String>,
    /// Value substituted for an empty field, one per column.
    pub defaults: Vec<String>,
    pub feature_column: String,
    pub label_column: String,
    pub delimiter: u8,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            headers: vec!["sentiment".into(), "review".into()],
            defaults: vec!["0".into(), String::new()],
            feature_column: "review".into(),
            label_column: "sentiment".into(),
            delimiter: b'\t',
        }
    }
}

impl Schema {
    /// Set the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TextCnnError::MissingColumn {
                column: name.to_string(),
                path: "<schema>".to_string(),
            })
    }

    fn decode_line(
        &self,
        line_no: usize,
        line: &str,
        feature: usize,
        label: usize,
    ) -> Result<Example> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_bytes());

        let mut record = csv::StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Err(TextCnnError::MalformedRow {
                line: line_no,
                reason: "no fields".into(),
            });
        }
        if record.len() != self.headers.len() {
            return Err(TextCnnError::MalformedRow {
                line: line_no,
                reason: format!(
                    "expected {} fields, found {}",
                    self.headers.len(),
                    record.len()
                ),
            });
        }

        let raw_label = field_or_default(&record, &self.defaults, label).trim();
        let label = raw_label
            .parse::<i32>()
            .map_err(|_| TextCnnError::MalformedRow {
                line: line_no,
                reason: format!("label {:?} is not an integer", raw_label),
            })?;

        Ok(Example {
            text: field_or_default(&record, &self.defaults, feature).to_string(),
            label,
        })
    }
}

fn field_or_default<'a>(
    record: &'a csv::StringRecord,
    defaults: &'a [String],
    i: usize,
) -> &'a str {
    match record.get(i) {
        Some(v) if !v.is_empty() => v,
        _ => defaults.get(i).map(String::as_str).unwrap_or(""),
    }
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub text: String,
    pub label: i32,
}

/// All examples of a training file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    /// Read `path`, skipping its header line, and decode every non-blank
    /// line against `schema`. Decoding is spread over the rayon pool.
    pub fn from_path<P: AsRef<Path>>(path: P, schema: &Schema) -> Result<Self> {
        let path = path.as_ref();
        let feature = schema.column_index(&schema.feature_column)?;
        let label = schema.column_index(&schema.label_column)?;

        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for (i, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push((i + 1, line));
            }
        }

        let examples = lines
            .par_iter()
            .map(|(line_no, line)| schema.decode_line(*line_no, line, feature, label))
            .collect::<Result<Vec<_>>>()?;

        info!(path = %path.display(), examples = examples.len(), "loaded dataset");
        Ok(Self { examples })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Iterate over batches of this dataset.
    pub fn batches(
        self,
        batch_size: usize,
        shuffle: bool,
        repeat_count: Option<usize>,
        seed: u64,
    ) -> Batches {
        Batches {
            examples: self.examples,
            batch_size: batch_size.max(1),
            shuffle,
            repeat_count,
            epoch: 0,
            order: Vec::new(),
            cursor: 0,
            rng: oorandom::Rand64::new(u128::from(seed)),
        }
    }
}

/// File-based input function parameters.
#[derive(Debug, Clone)]
pub struct InputFn {
    pub path: PathBuf,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Number of passes over the file; `None` repeats forever.
    pub repeat_count: Option<usize>,
}

impl InputFn {
    /// One unshuffled pass with batches of 32.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: 32,
            shuffle: false,
            repeat_count: Some(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_repeat_count(mut self, repeat_count: Option<usize>) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// Load the file and return its batch iterator.
    pub fn batches(&self, schema: &Schema, seed: u64) -> Result<Batches> {
        let dataset = Dataset::from_path(&self.path, schema)?;
        Ok(dataset.batches(self.batch_size, self.shuffle, self.repeat_count, seed))
    }
}

/// A group of examples fed to the model in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub texts: Vec<String>,
    pub labels: Vec<i32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Word ids `[batch, max_len]` (u32) and labels `[batch, 1]` (f32).
    pub fn to_tensors(
        &self,
        table: &VocabTable,
        max_len: usize,
        device: &Device,
    ) -> Result<(Tensor, Tensor)> {
        let ids = table.encode_batch(&self.texts, max_len, device)?;
        let labels: Vec<f32> = self.labels.iter().map(|&l| l as f32).collect();
        let labels = Tensor::from_vec(labels, (self.labels.len(), 1), device)?;
        Ok((ids, labels))
    }
}

/// Shuffle, batch and repeat over an in-memory dataset.
pub struct Batches {
    examples: Vec<Example>,
    batch_size: usize,
    shuffle: bool,
    repeat_count: Option<usize>,
    epoch: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: oorandom::Rand64,
}

impl Batches {
    /// Index of the current pass, starting at 0.
    pub fn epoch(&self) -> usize {
        self.epoch.saturating_sub(1)
    }

    fn start_epoch(&mut self) -> bool {
        if self.examples.is_empty() {
            return false;
        }
        if let Some(limit) = self.repeat_count {
            if self.epoch >= limit {
                return false;
            }
        }
        self.order = if self.shuffle {
            buffered_shuffle(self.examples.len(), SHUFFLE_BUFFER_SIZE, &mut self.rng)
        } else {
            (0..self.examples.len()).collect()
        };
        self.cursor = 0;
        self.epoch += 1;
        debug!(epoch = self.epoch, "starting pass over dataset");
        true
    }
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() && !self.start_epoch() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let mut batch = Batch::default();
        for &idx in &self.order[self.cursor..end] {
            let example = &self.examples[idx];
            batch.texts.push(example.text.clone());
            batch.labels.push(example.label);
        }
        self.cursor = end;
        Some(batch)
    }
}

/// Streaming shuffle: draw uniformly from a window of `buffer_size`
/// upcoming indices, refilling from the stream after every draw.
fn buffered_shuffle(n: usize, buffer_size: usize, rng: &mut oorandom::Rand64) -> Vec<usize> {
    let mut out = Vec::with_capacity(n);
    let mut buffer: Vec<usize> = Vec::with_capacity(buffer_size.min(n));
    let mut next = 0usize;

    while next < n && buffer.len() < buffer_size {
        buffer.push(next);
        next += 1;
    }
    while !buffer.is_empty() {
        let pick = rng.rand_range(0..buffer.len() as u64) as usize;
        out.push(buffer.swap_remove(pick));
        if next < n {
            buffer.push(next);
            next += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tsv(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("train.tsv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_decode_skips_header_and_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tsv(dir.path(), "sentiment\treview\n1\tgreat movie\n\tboring\n0\t\n\n");

        let dataset = Dataset::from_path(&path, &Schema::default()).unwrap();
        assert_eq!(
            dataset.examples(),
            &[
                Example { text: "great movie".into(), label: 1 },
                Example { text: "boring".into(), label: 0 },
                Example { text: String::new(), label: 0 },
            ]
        );
    }

    #[test]
    fn test_wrong_field_count_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tsv(dir.path(), "sentiment\treview\n1\tok\n1\ttoo\tmany\n");

        let err = Dataset::from_path(&path, &Schema::default()).unwrap_err();
        assert!(matches!(err, TextCnnError::MalformedRow { line: 3, .. }));
    }

    #[test]
    fn test_non_integer_label_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tsv(dir.path(), "sentiment\treview\npositive\tok\n");

        let err = Dataset::from_path(&path, &Schema::default()).unwrap_err();
        assert!(matches!(err, TextCnnError::MalformedRow { line: 2, .. }));
    }

    #[test]
    fn test_batching_keeps_partial_batch() {
        let examples = (0..5)
            .map(|i| Example { text: format!("w{i}"), label: i % 2 })
            .collect();
        let sizes: Vec<usize> = Dataset::new(examples)
            .batches(2, false, Some(1), 0)
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_repeat_and_shuffle_cover_every_example_each_pass() {
        let examples: Vec<Example> = (0..50)
            .map(|i| Example { text: format!("w{i}"), label: 0 })
            .collect();
        let batches: Vec<Batch> = Dataset::new(examples)
            .batches(7, true, Some(3), 42)
            .collect();

        let texts: Vec<String> = batches.into_iter().flat_map(|b| b.texts).collect();
        assert_eq!(texts.len(), 150);
        for pass in texts.chunks(50) {
            let mut sorted = pass.to_vec();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), 50);
        }
        let first: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
        assert_ne!(texts[..50].to_vec(), first);
    }

    #[test]
    fn test_infinite_repeat_and_empty_dataset() {
        let examples = vec![Example { text: "a".into(), label: 1 }];
        let taken = Dataset::new(examples).batches(4, false, None, 0).take(10).count();
        assert_eq!(taken, 10);

        assert_eq!(Dataset::default().batches(4, true, None, 0).count(), 0);
    }

    #[test]
    fn test_batch_tensors() {
        let table = VocabTable::from_tokens([crate::vocab::PAD_WORD, "good", "bad"], 1).unwrap();
        let batch = Batch {
            texts: vec!["good".into(), "bad bad".into()],
            labels: vec![1, 0],
        };
        let (ids, labels) = batch.to_tensors(&table, 3, &Device::Cpu).unwrap();
        assert_eq!(ids.dims(), &[2, 3]);
        assert_eq!(labels.to_vec2::<f32>().unwrap(), vec![vec![1.0], vec![0.0]]);
    }
}
