//! Sparse lexical backend: character n-gram TF-IDF
//!
//! Word-boundary-aware character n-grams need no word segmentation,
//! which keeps Chinese text retrievable without a tokenizer.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{IndexError, Result};

lazy_static! {
    static ref MULTI_SPACE_RE: Regex = Regex::new(r"\s\s+").unwrap();
}

/// Vocabulary cap; the most frequent n-grams are kept
pub const MAX_FEATURES: usize = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Analyzer {
    /// N-grams inside space-padded words
    CharWb,
    /// N-grams over the whole text, spaces included
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramConfig {
    pub analyzer: Analyzer,
    pub min_n: usize,
    pub max_n: usize,
    pub max_features: usize,
}

impl NgramConfig {
    /// First attempt: word-boundary n-grams of length 2-4
    pub const WORD_BOUNDARY: Self = Self {
        analyzer: Analyzer::CharWb,
        min_n: 2,
        max_n: 4,
        max_features: MAX_FEATURES,
    };

    /// Retry for degenerate vocabularies: plain n-grams of length 1-3
    pub const PLAIN_CHAR: Self = Self {
        analyzer: Analyzer::Char,
        min_n: 1,
        max_n: 3,
        max_features: MAX_FEATURES,
    };

    /// Lowercase, collapse whitespace runs, then extract n-grams
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let normalized = MULTI_SPACE_RE.replace_all(&lowered, " ");
        match self.analyzer {
            Analyzer::CharWb => self.char_wb_ngrams(&normalized),
            Analyzer::Char => self.char_ngrams(&normalized),
        }
    }

    fn char_wb_ngrams(&self, text: &str) -> Vec<String> {
        let mut ngrams = Vec::new();
        for word in text.split_whitespace() {
            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            let len = padded.len();

            for n in self.min_n..=self.max_n {
                let mut offset = 0;
                ngrams.push(padded[offset..(offset + n).min(len)].iter().collect());
                while offset + n < len {
                    offset += 1;
                    ngrams.push(padded[offset..offset + n].iter().collect());
                }
                // A word shorter than n is counted once
                if offset == 0 {
                    break;
                }
            }
        }
        ngrams
    }

    fn char_ngrams(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut ngrams = Vec::new();
        for n in self.min_n.max(1)..=self.max_n.min(len) {
            for window in chars.windows(n) {
                ngrams.push(window.iter().collect());
            }
        }
        ngrams
    }
}

/// Persisted form of the vectorizer; the term lookup is rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorizerState {
    config: NgramConfig,
    terms: Vec<String>,
    idf: Vec<f32>,
}

/// Fitted character n-gram TF-IDF vectorizer
///
/// Smooth idf `ln((1 + n) / (1 + df)) + 1`, raw counts, L2-normalised rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "VectorizerState", into = "VectorizerState")]
pub struct CharNgramTfidf {
    config: NgramConfig,
    terms: Vec<String>,
    idf: Vec<f32>,
    lookup: HashMap<String, u32>,
}

impl From<VectorizerState> for CharNgramTfidf {
    fn from(state: VectorizerState) -> Self {
        let lookup = state
            .terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self {
            config: state.config,
            terms: state.terms,
            idf: state.idf,
            lookup,
        }
    }
}

impl From<CharNgramTfidf> for VectorizerState {
    fn from(v: CharNgramTfidf) -> Self {
        Self {
            config: v.config,
            terms: v.terms,
            idf: v.idf,
        }
    }
}

impl CharNgramTfidf {
    /// Fit with the word-boundary config, retrying once with plain n-grams
    pub fn fit(texts: &[&str]) -> Result<(Self, SparseMatrix)> {
        match Self::fit_with(NgramConfig::WORD_BOUNDARY, texts) {
            Err(IndexError::DegenerateVocabulary) => {
                tracing::debug!("Empty char_wb vocabulary, retrying with plain char n-grams");
                Self::fit_with(NgramConfig::PLAIN_CHAR, texts)
            }
            other => other,
        }
    }

    pub fn fit_with(config: NgramConfig, texts: &[&str]) -> Result<(Self, SparseMatrix)> {
        let docs: Vec<Vec<String>> = texts.iter().map(|t| config.analyze(t)).collect();

        // term -> (document frequency, corpus frequency)
        let mut stats: HashMap<&str, (u32, u64)> = HashMap::new();
        for doc in &docs {
            let mut seen: HashMap<&str, ()> = HashMap::new();
            for gram in doc {
                let entry = stats.entry(gram.as_str()).or_insert((0, 0));
                entry.1 += 1;
                if seen.insert(gram.as_str(), ()).is_none() {
                    entry.0 += 1;
                }
            }
        }
        if stats.is_empty() {
            return Err(IndexError::DegenerateVocabulary);
        }

        let mut kept: Vec<(&str, u32, u64)> =
            stats.into_iter().map(|(t, (df, tf))| (t, df, tf)).collect();
        if kept.len() > config.max_features {
            kept.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
            kept.truncate(config.max_features);
        }
        kept.sort_by(|a, b| a.0.cmp(b.0));

        let n_docs = texts.len() as f64;
        let state = VectorizerState {
            config,
            terms: kept.iter().map(|(t, _, _)| t.to_string()).collect(),
            idf: kept
                .iter()
                .map(|(_, df, _)| (((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0) as f32)
                .collect(),
        };
        let vectorizer = Self::from(state);

        let mut matrix = SparseMatrix::new(vectorizer.terms.len());
        for doc in &docs {
            matrix.push_row(vectorizer.weigh(doc));
        }
        Ok((vectorizer, matrix))
    }

    pub fn config(&self) -> NgramConfig {
        self.config
    }

    pub fn vocabulary_len(&self) -> usize {
        self.terms.len()
    }

    /// TF-IDF vector of one text, sorted by column, unit length
    pub fn transform(&self, text: &str) -> Vec<(u32, f32)> {
        self.weigh(&self.config.analyze(text))
    }

    fn weigh(&self, grams: &[String]) -> Vec<(u32, f32)> {
        let mut counts: HashMap<u32, f32> = HashMap::new();
        for gram in grams {
            if let Some(&col) = self.lookup.get(gram) {
                *counts.entry(col).or_insert(0.0) += 1.0;
            }
        }

        let mut row: Vec<(u32, f32)> = counts
            .into_iter()
            .map(|(col, tf)| (col, tf * self.idf[col as usize]))
            .collect();
        row.sort_by_key(|(col, _)| *col);

        let norm = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut row {
                *w /= norm;
            }
        }
        row
    }

    /// Consistency check run after deserialisation
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.terms.is_empty() {
            return Err("empty vocabulary".into());
        }
        if self.idf.len() != self.terms.len() {
            return Err(format!(
                "{} idf weights for {} terms",
                self.idf.len(),
                self.terms.len()
            ));
        }
        if self.lookup.len() != self.terms.len() {
            return Err("duplicate terms in vocabulary".into());
        }
        Ok(())
    }
}

/// Compressed sparse row matrix of L2-normalised document vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    data: Vec<f32>,
}

impl SparseMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn push_row(&mut self, row: Vec<(u32, f32)>) {
        for (col, w) in row {
            self.indices.push(col);
            self.data.push(w);
        }
        self.indptr.push(self.indices.len());
    }

    /// Cosine similarity of a normalised query against every row
    pub fn scores(&self, query: &[(u32, f32)]) -> Vec<f32> {
        let mut dense = vec![0.0f32; self.n_cols];
        for &(col, w) in query {
            if let Some(slot) = dense.get_mut(col as usize) {
                *slot = w;
            }
        }

        self.indptr
            .windows(2)
            .map(|span| {
                self.indices[span[0]..span[1]]
                    .iter()
                    .zip(&self.data[span[0]..span[1]])
                    .map(|(&col, &w)| w * dense[col as usize])
                    .sum()
            })
            .collect()
    }

    /// Structural check run after deserialisation
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.indptr.first() != Some(&0) {
            return Err("row pointer must start at 0".into());
        }
        if self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err("row pointer is not monotonic".into());
        }
        if self.indptr.last() != Some(&self.indices.len()) || self.indices.len() != self.data.len()
        {
            return Err("row pointer, indices and data lengths disagree".into());
        }
        if self.indices.iter().any(|&c| c as usize >= self.n_cols) {
            return Err("column index out of range".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_wb_ngrams() {
        let grams = NgramConfig::WORD_BOUNDARY.analyze("A1  中国");
        // " a1 " -> 2-grams, 3-grams, the whole padded word as 4-gram
        assert!(grams.contains(&" a".to_string()));
        assert!(grams.contains(&"a1 ".to_string()));
        assert!(grams.contains(&" a1 ".to_string()));
        assert!(grams.contains(&" 中国 ".to_string()));
        assert!(!grams.iter().any(|g| g.contains("1 中")));
    }

    #[test]
    fn test_short_word_counted_once() {
        // " x " has length 3: 2-grams " x", "x ", then one 3-gram, then stop
        let grams = NgramConfig::WORD_BOUNDARY.analyze("x");
        assert_eq!(grams, vec![" x", "x ", " x "]);
    }

    #[test]
    fn test_char_ngrams() {
        let grams = NgramConfig::PLAIN_CHAR.analyze("ab");
        assert_eq!(grams, vec!["a", "b", "ab"]);
    }

    #[test]
    fn test_fit_rows_are_normalized() {
        let texts = ["国家: 中国 | 型号: A1", "国家: 美国 | 型号: B2"];
        let (vec, matrix) = CharNgramTfidf::fit(&texts).unwrap();

        assert_eq!(matrix.n_rows(), 2);
        assert_eq!(matrix.n_cols(), vec.vocabulary_len());
        assert_eq!(vec.config(), NgramConfig::WORD_BOUNDARY);
        for score in matrix.scores(&vec.transform(texts[0])) {
            assert!(score <= 1.0 + 1e-5);
        }
        let self_scores = matrix.scores(&vec.transform(texts[1]));
        assert!((self_scores[1] - 1.0).abs() < 1e-5);
        assert!(self_scores[0] < self_scores[1]);
    }

    #[test]
    fn test_idf_downweights_shared_terms() {
        let texts = ["国家: 中国", "国家: 美国", "国家: 法国"];
        let (vec, _) = CharNgramTfidf::fit(&texts).unwrap();
        let shared = vec.lookup[" 国家"] as usize;
        let rare = vec.lookup[" 中国"] as usize;
        assert!(vec.idf[shared] < vec.idf[rare]);
        assert!((vec.idf[shared] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_whitespace_corpus_retries_with_plain_chars() {
        let texts = ["   ", " \t "];
        assert!(matches!(
            CharNgramTfidf::fit_with(NgramConfig::WORD_BOUNDARY, &texts),
            Err(IndexError::DegenerateVocabulary)
        ));

        let (vec, matrix) = CharNgramTfidf::fit(&texts).unwrap();
        assert_eq!(vec.config(), NgramConfig::PLAIN_CHAR);
        assert_eq!(matrix.n_rows(), 2);
    }

    #[test]
    fn test_empty_texts_are_degenerate() {
        assert!(matches!(
            CharNgramTfidf::fit(&["", ""]),
            Err(IndexError::DegenerateVocabulary)
        ));
    }

    #[test]
    fn test_max_features_keeps_frequent_terms() {
        let config = NgramConfig {
            max_features: 2,
            ..NgramConfig::PLAIN_CHAR
        };
        let (vec, _) = CharNgramTfidf::fit_with(config, &["aaab", "aac"]).unwrap();
        assert_eq!(vec.terms, vec!["a", "aa"]);
    }

    #[test]
    fn test_unknown_query_scores_zero() {
        let (vec, matrix) = CharNgramTfidf::fit(&["abc", "def"]).unwrap();
        assert!(vec.transform("zzz").is_empty());
        assert_eq!(matrix.scores(&vec.transform("zzz")), vec![0.0, 0.0]);
    }

    #[test]
    fn test_serde_rebuilds_lookup() {
        let (vec, matrix) = CharNgramTfidf::fit(&["跑道 长度", "掩蔽库 宽度"]).unwrap();
        let bytes = bincode::serialize(&vec).unwrap();
        let restored: CharNgramTfidf = bincode::deserialize(&bytes).unwrap();
        assert!(restored.validate().is_ok());
        assert_eq!(
            matrix.scores(&restored.transform("跑道")),
            matrix.scores(&vec.transform("跑道"))
        );
    }

    #[test]
    fn test_matrix_validate() {
        let mut m = SparseMatrix::new(2);
        m.push_row(vec![(0, 1.0)]);
        assert!(m.validate().is_ok());
        m.indices[0] = 5;
        assert!(m.validate().is_err());
    }
}
