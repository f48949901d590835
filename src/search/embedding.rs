//! Dense text embedders
//!
//! Two models sit behind the [`Embedder`] trait:
//!
//! - Harmonic Token Projection (HTP), a deterministic, training-free
//!   embedding ("Harmonic Token Projection: A Vocabulary-Free,
//!   Training-Free, Deterministic, and Reversible Embedding Methodology",
//!   https://arxiv.org/html/2511.20665). Always available. Tokens are
//!   hashed to their integer (so not reversible here) and CJK runs are
//!   split into character bigrams, since unsegmented text has no spaces.
//! - Pretrained sentence-embedding models through `fastembed`, compiled in
//!   with the `fastembed` feature.
//!
//! All embedders return L2-normalised vectors.

use std::f64::consts::PI;
use std::sync::Arc;

use super::error::{IndexError, Result};

/// Model id of the built-in HTP embedder
pub const HTP_MODEL: &str = "htp-384";

/// Model tried when the caller has no preference
pub const DEFAULT_DENSE_MODEL: &str = "paraphrase-multilingual-MiniLM-L12-v2";

/// HTP dimension (2 * number of coprime moduli)
pub const HTP_DIM: usize = 384;

const NUM_MODULI: usize = HTP_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// First NUM_MODULI primes, pairwise coprime by construction
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// Text embedding model shared by a dense index and its queries
pub trait Embedder: Send + Sync {
    /// Identifier persisted in index metadata
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// One L2-normalised vector per input text
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| IndexError::Embedding("no embedding generated".into()))
    }
}

/// Load the embedder named by `model`
///
/// Fails with [`IndexError::BackendUnavailable`] when the model is unknown
/// or its runtime is not compiled in.
pub fn load_embedder(model: &str) -> Result<Arc<dyn Embedder>> {
    if model == HTP_MODEL {
        return Ok(Arc::new(HarmonicEmbedder::new()));
    }

    #[cfg(feature = "fastembed")]
    {
        return Ok(Arc::new(pretrained::FastEmbedder::load(model)?));
    }

    #[cfg(not(feature = "fastembed"))]
    Err(IndexError::BackendUnavailable(format!(
        "model '{model}' needs the `fastembed` feature"
    )))
}

/// Scale `v` to unit length in place; zero vectors stay zero
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Harmonic Token Projection embedder
pub struct HarmonicEmbedder {
    moduli: Vec<u64>,
}

impl HarmonicEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    /// Mean of token projections, L2-normalised
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; HTP_DIM];
        }

        let mut sum = vec![0.0f64; HTP_DIM];
        for token in &tokens {
            for (acc, val) in sum.iter_mut().zip(self.embed_token(token)) {
                *acc += val;
            }
        }

        let count = tokens.len() as f64;
        let norm = sum.iter().map(|x| (x / count) * (x / count)).sum::<f64>().sqrt();
        sum.iter()
            .map(|x| {
                let mean = x / count;
                if norm > 0.0 {
                    (mean / norm) as f32
                } else {
                    mean as f32
                }
            })
            .collect()
    }

    /// E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)] with r_i = N mod m_i
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);
        let mut embedding = Vec::with_capacity(HTP_DIM);
        for &m in &self.moduli {
            let theta = 2.0 * PI * ((n % m) as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }
        embedding
    }
}

impl Default for HarmonicEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HarmonicEmbedder {
    fn model_name(&self) -> &str {
        HTP_MODEL
    }

    fn dimension(&self) -> usize {
        HTP_DIM
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// FNV-1a over code points; every character affects the result
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(FNV_OFFSET, |n, c| (n ^ c as u64).wrapping_mul(FNV_PRIME))
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // kana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}' // compatibility ideographs
    )
}

/// Lowercased alphanumeric runs; CJK runs longer than one character
/// become overlapping bigrams
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|s| !s.is_empty()) {
        let chars: Vec<char> = word.to_lowercase().chars().collect();
        let mut start = 0;
        while start < chars.len() {
            let cjk = is_cjk(chars[start]);
            let end = chars[start..]
                .iter()
                .position(|&c| is_cjk(c) != cjk)
                .map_or(chars.len(), |n| start + n);
            let run = &chars[start..end];
            if cjk && run.len() > 1 {
                tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
            } else {
                tokens.push(run.iter().collect());
            }
            start = end;
        }
    }
    tokens
}

#[cfg(feature = "fastembed")]
mod pretrained {
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tracing::info;

    use super::{l2_normalize, Embedder};
    use crate::search::error::{IndexError, Result};

    const BATCH_SIZE: usize = 32;

    pub struct FastEmbedder {
        model: TextEmbedding,
        name: String,
        dimension: usize,
    }

    impl FastEmbedder {
        pub fn load(name: &str) -> Result<Self> {
            let short = name.rsplit('/').next().unwrap_or(name);
            let (kind, dimension) = match short {
                "paraphrase-multilingual-MiniLM-L12-v2" => {
                    (EmbeddingModel::ParaphraseMLMiniLML12V2, 384)
                }
                "all-MiniLM-L6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
                other => {
                    return Err(IndexError::BackendUnavailable(format!(
                        "unknown embedding model '{other}'"
                    )))
                }
            };

            info!("Loading embedding model {}", name);
            let model = TextEmbedding::try_new(
                InitOptions::new(kind).with_show_download_progress(false),
            )
            .map_err(|e| IndexError::BackendUnavailable(e.to_string()))?;

            Ok(Self {
                model,
                name: name.to_string(),
                dimension,
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut vectors = self
                .model
                .embed(texts.to_vec(), Some(BATCH_SIZE))
                .map_err(|e| IndexError::Embedding(e.to_string()))?;
            for v in &mut vectors {
                l2_normalize(v);
            }
            Ok(vectors)
        }
    }
}
