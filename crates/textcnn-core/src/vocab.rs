//! # Vocabulary Builder
//!
//! Derives the word list for the classifier from one text column of a CSV
//! corpus. The vocabulary file starts with the reserved padding token and
//! lists every distinct token once; the count file holds the number of
//! corpus tokens (padding excluded).

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TextCnnError};

/// Reserved padding token stored at vocabulary index 0.
pub const PAD_WORD: &str = "#=KS=#";

/// How empty tokens produced by tokenization are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyTokenPolicy {
    /// Split on whitespace runs; empty and missing cells add nothing.
    #[default]
    Drop,
    /// Split on every single whitespace character and keep the empty-string
    /// token, so an empty or missing cell contributes `""` to the vocabulary.
    /// Line breaks inside quoted cells never end up inside a token.
    Retain,
}

impl EmptyTokenPolicy {
    /// Split `text` into tokens according to this policy.
    pub fn tokenize<'a>(&self, text: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            EmptyTokenPolicy::Drop => Box::new(text.split_whitespace()),
            EmptyTokenPolicy::Retain => Box::new(text.split(char::is_whitespace)),
        }
    }
}

/// Distinct corpus tokens in first-occurrence order, padding token excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<String>,
}

impl Vocabulary {
    /// Number of corpus tokens (the value written to the count file).
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// Write the padding token followed by one token per line.
    pub fn write_vocab_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        writeln!(out, "{}", PAD_WORD)?;
        for token in &self.tokens {
            writeln!(out, "{}", token)?;
        }
        out.flush()?;
        debug!(
            path = %path.as_ref().display(),
            lines = self.tokens.len() + 1,
            "wrote vocabulary file"
        );
        Ok(())
    }

    /// Write the vocabulary size as a single integer.
    pub fn write_count_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.tokens.len().to_string())?;
        Ok(())
    }
}

/// Builds a [`Vocabulary`] from a designated CSV text column.
#[derive(Debug, Clone)]
pub struct VocabBuilder {
    text_column: String,
    delimiter: u8,
    policy: EmptyTokenPolicy,
}

impl Default for VocabBuilder {
    fn default() -> Self {
        Self {
            text_column: "review".to_string(),
            delimiter: b',',
            policy: EmptyTokenPolicy::Drop,
        }
    }
}

impl VocabBuilder {
    /// Create a builder reading the given column of a comma-delimited file.
    pub fn new(text_column: impl Into<String>) -> Self {
        Self {
            text_column: text_column.into(),
            ..Self::default()
        }
    }

    /// Set the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the empty-token policy.
    pub fn with_policy(mut self, policy: EmptyTokenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> EmptyTokenPolicy {
        self.policy
    }

    /// Read the corpus at `path` and collect its vocabulary.
    ///
    /// The file must have a header row naming `text_column`. Records that
    /// are too short to reach the column are treated as empty text.
    pub fn build_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Vocabulary> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let column = reader
            .headers()?
            .iter()
            .position(|h| h == self.text_column)
            .ok_or_else(|| TextCnnError::MissingColumn {
                column: self.text_column.clone(),
                path: path.display().to_string(),
            })?;

        let mut collector = Collector::new(self.policy);
        let mut rows = 0usize;
        for record in reader.records() {
            let record = record?;
            collector.add(record.get(column).unwrap_or(""));
            rows += 1;
        }

        let vocab = collector.finish();
        info!(
            path = %path.display(),
            rows,
            tokens = vocab.len(),
            "built vocabulary"
        );
        Ok(vocab)
    }

    /// Collect the vocabulary of in-memory rows.
    pub fn build_from_rows<'a, I>(&self, rows: I) -> Vocabulary
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut collector = Collector::new(self.policy);
        for row in rows {
            collector.add(row);
        }
        collector.finish()
    }
}

struct Collector {
    policy: EmptyTokenPolicy,
    seen: HashSet<String>,
    tokens: Vec<String>,
}

impl Collector {
    fn new(policy: EmptyTokenPolicy) -> Self {
        Self {
            policy,
            seen: HashSet::new(),
            tokens: Vec::new(),
        }
    }

    fn add(&mut self, text: &str) {
        for word in self.policy.tokenize(text) {
            // The padding line already occupies index 0.
            if word == PAD_WORD || self.seen.contains(word) {
                continue;
            }
            self.seen.insert(word.to_string());
            self.tokens.push(word.to_string());
        }
    }

    fn finish(self) -> Vocabulary {
        Vocabulary {
            tokens: self.tokens,
        }
    }
}
