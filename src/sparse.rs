//! Local BM25-style sparse text encoding.
//!
//! Produces the `text_sparse` named vector: hashed token indices with
//! saturation-weighted term frequencies. Document-frequency weighting is
//! applied store-side via the IDF modifier on the sparse vector config,
//! so the encoder only handles the term-frequency component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Reference document length for the length-normalisation term.
const AVG_DOC_LEN: f32 = 256.0;

/// Tokens shorter than this carry no lexical signal.
const MIN_TOKEN_LEN: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "if", "in", "is", "it", "its", "my", "no", "not", "of", "on",
    "or", "our", "she", "so", "that", "the", "their", "them", "there", "they", "this", "to", "was",
    "we", "were", "which", "will", "with", "would", "you",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sparse dot product against another vector. Both index lists are
    /// sorted ascending, so a single merge pass suffices.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut score = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    score += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        score
    }
}

pub struct SparseEncoder;

impl SparseEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        let doc_len = tokens.len() as f32;

        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token_index(&token)).or_insert(0) += 1;
        }

        let norm = K1 * (1.0 - B + B * doc_len / AVG_DOC_LEN);
        let mut indices = Vec::with_capacity(counts.len());
        let mut values = Vec::with_capacity(counts.len());
        for (index, count) in counts {
            let tf = count as f32;
            indices.push(index);
            values.push(tf * (K1 + 1.0) / (tf + norm));
        }
        SparseVector { indices, values }
    }
}

impl Default for SparseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Stable token index: first four bytes of sha256(token).
fn token_index(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_deterministic() {
        let encoder = SparseEncoder::new();
        let a = encoder.encode("The Minister for Housing answered the question.");
        let b = encoder.encode("The Minister for Housing answered the question.");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn stopwords_and_short_tokens_are_dropped() {
        let encoder = SparseEncoder::new();
        let v = encoder.encode("the and a of I");
        assert!(v.is_empty());
    }

    #[test]
    fn repeated_terms_saturate() {
        let encoder = SparseEncoder::new();
        let once = encoder.encode("housing");
        let many = encoder.encode("housing housing housing housing");
        assert_eq!(once.indices, many.indices);
        // More occurrences weigh more, but sub-linearly.
        assert!(many.values[0] > once.values[0]);
        assert!(many.values[0] < once.values[0] * 4.0);
    }

    #[test]
    fn indices_are_sorted_for_merge_dot() {
        let encoder = SparseEncoder::new();
        let v = encoder.encode("immigration policy debate funding schools transport");
        let mut sorted = v.indices.clone();
        sorted.sort_unstable();
        assert_eq!(v.indices, sorted);
    }

    #[test]
    fn dot_overlap_scores_positive() {
        let encoder = SparseEncoder::new();
        let q = encoder.encode("school funding");
        let hit = encoder.encode("funding for schools was debated");
        let miss = encoder.encode("railway electrification timetable");
        assert!(q.dot(&hit) > 0.0);
        assert_eq!(q.dot(&miss), 0.0);
    }
}
