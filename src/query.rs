//! Text-to-brain-map queries.
//!
//! A [`SemanticEncoder`] turns free text into a statistical brain map, together with the vocabulary
//! terms and documents most similar to it. [`TermMapEncoder`] implements this on top of a directory
//! of precomputed per-term maps: the query is tokenized into unigrams and bigrams, the maps of the
//! vocabulary terms found in it are combined with their occurrence counts as weights, and the result
//! is z-scored.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{LightMindedError, Result};
use crate::util::read_text_file;
use crate::volume::{add_scaled, check_same_grid, zeros_like, Volume};

/// The vocabulary file of a term map model directory, with columns `term` and `map`.
pub const VOCABULARY_FILE: &str = "vocabulary.csv";
/// The optional document file of a term map model directory, with columns `id`, `title` and `terms`.
pub const DOCUMENTS_FILE: &str = "documents.csv";
/// Threshold of the encoder's own thresholded map.
pub const DEFAULT_ENCODER_THRESHOLD: f32 = 3.1;


/// A vocabulary term, ranked by the similarity of its map to the query map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTerm {
    pub term: String,
    /// Cosine similarity between the term map and the query map.
    pub similarity: f64,
    /// How often the term occurs in the query.
    pub weight_in_query: f64,
}

/// A document, ranked by the overlap of its terms with the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDocument {
    pub id: String,
    pub title: String,
    pub similarity: f64,
}

/// Everything an encoder produces for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// The z-scored statistical map.
    pub brain_map: Volume,
    /// `brain_map` thresholded by the encoder.
    pub thresholded_map: Volume,
    /// All terms, most similar first.
    pub similar_words: Vec<RankedTerm>,
    /// Documents sharing terms with the query, most similar first.
    pub similar_documents: Vec<RankedDocument>,
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Query result with {} ranked terms and {} ranked documents.",
            self.similar_words.len(), self.similar_documents.len())
    }
}


/// Encodes free text into a brain map.
pub trait SemanticEncoder {
    fn encode(&self, query: &str) -> Result<QueryResult>;
}


/// A document known to the encoder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(deserialize_with = "deserialize_terms")]
    pub terms: Vec<String>,
}

fn deserialize_terms<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.split(';')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect())
}

#[derive(Debug, Deserialize)]
struct VocabularyRow {
    term: String,
    map: String,
}

#[derive(Debug, Clone)]
struct TermMap {
    term: String,
    map: Volume,
    norm: f64,
}


/// Split a query into lowercase unigrams and bigrams of alphanumeric words.
pub fn tokenize(query: &str) -> Vec<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let mut tokens = words.clone();
    tokens.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    tokens
}

fn dot(a: &Volume, b: &Volume) -> f64 {
    a.data.iter().zip(b.data.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

fn z_score(volume: &mut Volume) {
    let n = volume.data.len();
    if n == 0 {
        return;
    }
    let mean = volume.data.iter().map(|v| *v as f64).sum::<f64>() / n as f64;
    let var = volume.data.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n as f64;
    let std = var.sqrt();
    if std == 0.0 {
        volume.data.fill(0.0);
        return;
    }
    volume.data.mapv_inplace(|v| ((v as f64 - mean) / std) as f32);
}

fn by_similarity(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}


/// Encoder over precomputed per-term brain maps sharing one voxel grid.
#[derive(Debug, Clone)]
pub struct TermMapEncoder {
    terms: Vec<TermMap>,
    index: HashMap<String, usize>,
    documents: Vec<Document>,
    threshold: f32,
}

impl TermMapEncoder {

    /// Build an encoder from term maps and documents. Terms are lowercased. All maps must share the
    /// voxel grid of the first one.
    pub fn new(terms: Vec<(String, Volume)>, documents: Vec<Document>) -> Result<TermMapEncoder> {
        if terms.is_empty() {
            return Err(LightMindedError::EmptyVocabulary);
        }
        let mut maps: Vec<TermMap> = Vec::with_capacity(terms.len());
        let mut index = HashMap::new();
        for (term, map) in terms {
            if let Some(first) = maps.first() {
                check_same_grid(&first.map, &map)?;
            }
            let term = term.trim().to_lowercase();
            let norm = dot(&map, &map).sqrt();
            index.insert(term.clone(), maps.len());
            maps.push(TermMap { term, map, norm });
        }
        Ok(TermMapEncoder { terms: maps, index, documents, threshold: DEFAULT_ENCODER_THRESHOLD })
    }

    /// Load an encoder from a model directory, see [`VOCABULARY_FILE`] and [`DOCUMENTS_FILE`]. Map
    /// paths in the vocabulary are relative to the directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<TermMapEncoder> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LightMindedError::ModelNotFound(dir.to_path_buf()));
        }

        let vocabulary = read_text_file(dir.join(VOCABULARY_FILE))?;
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(vocabulary.as_bytes());
        let mut terms = Vec::new();
        for row in rdr.deserialize() {
            let row: VocabularyRow = row?;
            let map = Volume::from_file(dir.join(&row.map))?;
            debug!("Loaded map for term '{}' from '{}'", row.term, row.map);
            terms.push((row.term, map));
        }

        let documents_path = dir.join(DOCUMENTS_FILE);
        let documents = if documents_path.is_file() {
            let text = read_text_file(&documents_path)?;
            let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(text.as_bytes());
            rdr.deserialize().collect::<std::result::Result<Vec<Document>, csv::Error>>()?
        } else {
            Vec::new()
        };

        info!("Loaded term map model with {} terms and {} documents from '{}'",
            terms.len(), documents.len(), dir.display());
        TermMapEncoder::new(terms, documents)
    }

    /// Set the threshold of the encoder's own thresholded map.
    pub fn with_threshold(mut self, threshold: f32) -> TermMapEncoder {
        self.threshold = threshold;
        self
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    /// Occurrence counts of vocabulary terms in the query, by term index.
    fn term_weights(&self, query: &str) -> HashMap<usize, f64> {
        let mut weights = HashMap::new();
        for token in tokenize(query) {
            if let Some(idx) = self.index.get(&token) {
                *weights.entry(*idx).or_insert(0.0) += 1.0;
            }
        }
        weights
    }

    fn rank_terms(&self, brain_map: &Volume, weights: &HashMap<usize, f64>) -> Vec<RankedTerm> {
        let map_norm = dot(brain_map, brain_map).sqrt();
        let mut ranked: Vec<RankedTerm> = self.terms.iter()
            .enumerate()
            .map(|(idx, t)| {
                let similarity = if map_norm > 0.0 && t.norm > 0.0 {
                    dot(brain_map, &t.map) / (map_norm * t.norm)
                } else {
                    0.0
                };
                RankedTerm {
                    term: t.term.clone(),
                    similarity,
                    weight_in_query: weights.get(&idx).copied().unwrap_or(0.0),
                }
            })
            .collect();
        ranked.sort_by(|a, b| by_similarity(a.similarity, b.similarity).then_with(|| a.term.cmp(&b.term)));
        ranked
    }

    fn rank_documents(&self, weights: &HashMap<usize, f64>) -> Vec<RankedDocument> {
        let mut ranked: Vec<RankedDocument> = self.documents.iter()
            .filter_map(|doc| {
                if doc.terms.is_empty() {
                    return None;
                }
                let overlap: f64 = doc.terms.iter()
                    .filter_map(|t| self.index.get(t))
                    .filter_map(|idx| weights.get(idx))
                    .sum();
                if overlap > 0.0 {
                    Some(RankedDocument {
                        id: doc.id.clone(),
                        title: doc.title.clone(),
                        similarity: overlap / (doc.terms.len() as f64).sqrt(),
                    })
                } else {
                    None
                }
            })
            .collect();
        ranked.sort_by(|a, b| by_similarity(a.similarity, b.similarity).then_with(|| a.id.cmp(&b.id)));
        ranked
    }
}

impl SemanticEncoder for TermMapEncoder {
    fn encode(&self, query: &str) -> Result<QueryResult> {
        let weights = self.term_weights(query);
        let mut brain_map = zeros_like(&self.terms[0].map);
        if weights.is_empty() {
            warn!("No vocabulary term found in query '{}', the brain map is empty", query);
        } else {
            debug!("Query '{}' matched {} vocabulary terms", query, weights.len());
            for (idx, weight) in weights.iter() {
                add_scaled(&mut brain_map, &self.terms[*idx].map, *weight as f32);
            }
            z_score(&mut brain_map);
        }

        let thresholded_map = brain_map.threshold_two_sided(self.threshold, 0);
        let similar_words = self.rank_terms(&brain_map, &weights);
        let similar_documents = self.rank_documents(&weights);
        Ok(QueryResult { brain_map, thresholded_map, similar_words, similar_documents })
    }
}
