//! Token to id lookup over a vocabulary file, with hashed
//! out-of-vocabulary buckets placed after the known tokens.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};

use crate::error::{Result, TextCnnError};
use crate::vocab::PAD_WORD;

/// Id of the padding token (first vocabulary line).
pub const PAD_ID: u32 = 0;

/// Maps tokens to embedding row ids.
#[derive(Debug, Clone)]
pub struct VocabTable {
    index: HashMap<String, u32>,
    num_oov_buckets: u32,
}

impl VocabTable {
    /// Load a vocabulary file: line `i` (0-based) gets id `i`.
    pub fn from_file<P: AsRef<Path>>(path: P, num_oov_buckets: u32) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        if lines.is_empty() {
            return Err(TextCnnError::EmptyVocabulary(path.display().to_string()));
        }
        Self::from_tokens(lines, num_oov_buckets)
    }

    /// Build a table from tokens in id order.
    pub fn from_tokens<I, S>(tokens: I, num_oov_buckets: u32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = HashMap::new();
        for (i, token) in tokens.into_iter().enumerate() {
            let token = token.into();
            if index.contains_key(&token) {
                return Err(TextCnnError::DuplicateToken {
                    token,
                    line: i + 1,
                });
            }
            index.insert(token, i as u32);
        }
        if num_oov_buckets == 0 {
            return Err(TextCnnError::InvalidParams(
                "num_oov_buckets must be at least 1".into(),
            ));
        }
        Ok(Self {
            index,
            num_oov_buckets,
        })
    }

    /// Number of known tokens, padding included.
    pub fn vocab_len(&self) -> usize {
        self.index.len()
    }

    /// Total number of ids the table can produce: the embedding row count.
    pub fn size(&self) -> usize {
        self.index.len() + self.num_oov_buckets as usize
    }

    /// Whether the padding token sits at id 0.
    pub fn has_pad_word(&self) -> bool {
        self.index.get(PAD_WORD) == Some(&PAD_ID)
    }

    pub fn lookup(&self, token: &str) -> u32 {
        match self.index.get(token) {
            Some(&id) => id,
            None => {
                let bucket = fnv1a(token.as_bytes()) % u64::from(self.num_oov_buckets);
                self.index.len() as u32 + bucket as u32
            }
        }
    }

    /// Split `text` on whitespace and map it to exactly `max_len` ids,
    /// truncating long documents and right-padding short ones.
    pub fn encode(&self, text: &str, max_len: usize) -> Vec<u32> {
        let mut ids: Vec<u32> = text
            .split_whitespace()
            .take(max_len)
            .map(|w| self.lookup(w))
            .collect();
        ids.resize(max_len, PAD_ID);
        ids
    }

    /// Encode a batch of documents into a `[batch, max_len]` u32 tensor.
    pub fn encode_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        max_len: usize,
        device: &Device,
    ) -> Result<Tensor> {
        let mut ids = Vec::with_capacity(texts.len() * max_len);
        for text in texts {
            ids.extend(self.encode(text.as_ref(), max_len));
        }
        Ok(Tensor::from_vec(ids, (texts.len(), max_len), device)?)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
