//! Embedding-based checks: question grounding and job-posting matching.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{
    CandidateProfile, CvflowError, EngineConfig, FlaggedQuestion, InterviewQuestions,
    JobRequirement, Result,
};

use crate::collaborators::{Embedder, JobCatalog, JobMatcher, QuestionValidator};

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive character splitter.
///
/// Splits on paragraph breaks first, then lines, then words, then characters,
/// and packs the pieces into chunks of at most `size` characters, carrying up
/// to `overlap` trailing characters into the next chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    pub size: usize,
    pub overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: 2000,
            overlap: 200,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self { size, overlap }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.size {
            return vec![text.trim().to_string()];
        }
        let index = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(index).copied().unwrap_or("");
        let rest = separators.get(index + 1..).unwrap_or(&[]);

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut fitting = Vec::new();
        for piece in pieces {
            if char_len(&piece) <= self.size {
                fitting.push(piece);
            } else {
                chunks.extend(self.merge(std::mem::take(&mut fitting), separator));
                if rest.is_empty() {
                    chunks.push(piece);
                } else {
                    chunks.extend(self.split_with(&piece, rest));
                }
            }
        }
        chunks.extend(self.merge(fitting, separator));
        chunks
    }

    fn merge(&self, pieces: Vec<String>, separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let joined_len = |window: &VecDeque<String>| -> usize {
            window.iter().map(|p| char_len(p)).sum::<usize>()
                + sep_len * window.len().saturating_sub(1)
        };
        let join = |window: &VecDeque<String>| -> String {
            window
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(separator)
                .trim()
                .to_string()
        };

        let mut chunks = Vec::new();
        let mut window: VecDeque<String> = VecDeque::new();
        for piece in pieces {
            let piece_len = char_len(&piece);
            if !window.is_empty() && joined_len(&window) + sep_len + piece_len > self.size {
                chunks.push(join(&window));
                while !window.is_empty()
                    && (joined_len(&window) > self.overlap
                        || joined_len(&window) + sep_len + piece_len > self.size)
                {
                    window.pop_front();
                }
            }
            window.push_back(piece);
        }
        if !window.is_empty() {
            chunks.push(join(&window));
        }
        chunks
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Cosine similarity. `0.0` for mismatched lengths, empty or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Highest similarity between `vector` and any of `candidates`; `0.0` if none.
pub fn max_similarity(vector: &[f32], candidates: &[Vec<f32>]) -> f32 {
    candidates
        .iter()
        .map(|c| cosine_similarity(vector, c))
        .reduce(f32::max)
        .unwrap_or(0.0)
}

async fn embed_all(embedder: &dyn Embedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let expected = texts.len();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != expected {
        return Err(CvflowError::collaborator(
            "embedder",
            format!("expected {expected} embeddings, got {}", vectors.len()),
        ));
    }
    Ok(vectors)
}

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

/// Local bag-of-words embedder: lowercase alphanumeric tokens hashed into a
/// fixed number of buckets. Texts sharing vocabulary score high; nothing is
/// learned. Stands in for a model-backed embedder in offline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    pub dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl HashingEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dims.max(1)];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
            .map(str::to_lowercase);
        for token in tokens {
            let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// EmbeddingQuestionValidator
// ---------------------------------------------------------------------------

/// Flags a question when its best similarity to the CV chunks and its best
/// similarity to the job chunks are both below the threshold.
pub struct EmbeddingQuestionValidator {
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    threshold: f32,
}

impl EmbeddingQuestionValidator {
    pub fn new(embedder: Arc<dyn Embedder>, chunker: Chunker, threshold: f32) -> Self {
        Self {
            embedder,
            chunker,
            threshold,
        }
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &EngineConfig) -> Self {
        Self::new(
            embedder,
            Chunker::from_config(config),
            config.similarity_threshold,
        )
    }
}

#[async_trait]
impl QuestionValidator for EmbeddingQuestionValidator {
    async fn validate(
        &self,
        questions: &InterviewQuestions,
        profile: &CandidateProfile,
        job: &JobRequirement,
    ) -> Result<Vec<FlaggedQuestion>> {
        let texts: Vec<String> = questions.validated_questions().map(String::from).collect();
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = self.embedder.as_ref();
        let cv_vectors = embed_all(embedder, self.chunker.split(&profile.markdown)).await?;
        let jd_vectors = embed_all(embedder, self.chunker.split(&job.to_text())).await?;
        let question_vectors = embed_all(embedder, texts.clone()).await?;

        let flagged: Vec<FlaggedQuestion> = texts
            .into_iter()
            .zip(&question_vectors)
            .filter_map(|(question, vector)| {
                let sim_cv = max_similarity(vector, &cv_vectors);
                let sim_jd = max_similarity(vector, &jd_vectors);
                (sim_cv < self.threshold && sim_jd < self.threshold)
                    .then(|| FlaggedQuestion::new(question, sim_cv, sim_jd))
            })
            .collect();
        tracing::debug!(
            questions = question_vectors.len(),
            flagged = flagged.len(),
            threshold = self.threshold,
            "Questions validated"
        );
        Ok(flagged)
    }
}

// ---------------------------------------------------------------------------
// EmbeddingJobMatcher
// ---------------------------------------------------------------------------

/// Scores every catalog posting by the mean similarity of the CV chunks to
/// the posting's embedding and returns the best posting above the threshold.
pub struct EmbeddingJobMatcher {
    embedder: Arc<dyn Embedder>,
    catalog: Arc<dyn JobCatalog>,
    chunker: Chunker,
    threshold: f32,
}

impl EmbeddingJobMatcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        catalog: Arc<dyn JobCatalog>,
        chunker: Chunker,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            catalog,
            chunker,
            threshold,
        }
    }

    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        catalog: Arc<dyn JobCatalog>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(
            embedder,
            catalog,
            Chunker::from_config(config),
            config.job_match_threshold,
        )
    }
}

#[async_trait]
impl JobMatcher for EmbeddingJobMatcher {
    async fn best_match(&self, profile: &CandidateProfile) -> Result<Option<JobRequirement>> {
        let postings = self.catalog.postings().await?;
        if postings.is_empty() {
            return Err(CvflowError::collaborator("job_catalog", "no job postings available"));
        }
        let cv_vectors = embed_all(self.embedder.as_ref(), self.chunker.split(&profile.markdown)).await?;
        if cv_vectors.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(f32, JobRequirement)> = None;
        for posting in postings {
            let score = cv_vectors
                .iter()
                .map(|v| cosine_similarity(v, &posting.embedding))
                .sum::<f32>()
                / cv_vectors.len() as f32;
            tracing::debug!(job = %posting.requirement.title, score, "Job posting scored");
            if score > self.threshold && best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, posting.requirement));
            }
        }
        Ok(best.map(|(_, job)| job))
    }
}
