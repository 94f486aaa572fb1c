// Connection analysis
// Asks a chat model why a note relates to its nearest neighbours


use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::database::{NoteMetadata, StoredMatch};
use crate::notes::{Note, truncate_chars};
use crate::{Result, VaultError};

/// Characters of the target note included in the prompt
pub const TARGET_PROMPT_CHARS: usize = 1500;
/// Characters of each candidate note included in the prompt
pub const CANDIDATE_PROMPT_CHARS: usize = 800;

const SYSTEM_PROMPT: &str = "You analyze a personal knowledge base. You explain, concretely and briefly, \
how notes relate to each other, focusing on practical knowledge and applications. \
Respond with a single JSON object and nothing else.";

/// Chat-completion capability used by the analyzer
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Return the model's reply to `prompt` under `system` instructions
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// A candidate note returned by a similarity query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub source_id: String,
    pub candidate_id: String,
    pub metadata: NoteMetadata,
    /// Cosine distance
    pub distance: f32,
    /// `1 - distance`, higher is more similar
    pub similarity: f32,
    /// Position in the query result, 0-based
    pub rank: usize,
}

impl SimilarityMatch {
    /// Convert raw store matches, dropping the source itself and renumbering ranks
    #[inline]
    pub fn from_stored(source_id: &str, matches: Vec<StoredMatch>) -> Vec<Self> {
        matches
            .into_iter()
            .filter(|m| m.id != source_id)
            .enumerate()
            .map(|(rank, m)| Self {
                source_id: source_id.to_string(),
                candidate_id: m.id,
                metadata: m.metadata,
                distance: m.distance,
                similarity: m.similarity,
                rank,
            })
            .collect()
    }
}

/// What the model said about one related note
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionInsight {
    /// Id of the related note the insight is about
    pub note: String,
    pub relationship: String,
    #[serde(deserialize_with = "string_or_list")]
    pub shared_concepts: Vec<String>,
    pub practical_applications: String,
    pub relevance: Option<f32>,
}

/// A note related to the analyzed note
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedNote {
    pub id: String,
    pub path: String,
    pub title: String,
    pub similarity: f32,
    pub insight: Option<ConnectionInsight>,
}

/// Model output, either parsed into fields or kept as text when parsing failed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Analysis {
    Structured {
        key_concepts: Vec<String>,
        summary: String,
        connections: Vec<ConnectionInsight>,
    },
    RawText(String),
}

/// The explanation published for one analyzed change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionExplanation {
    pub source_id: String,
    pub source_title: String,
    pub related: Vec<RelatedNote>,
    pub analysis: Analysis,
    /// Highest similarity among the related notes
    pub relevance: Option<f32>,
    pub generated_at: DateTime<Utc>,
}

impl ConnectionExplanation {
    #[inline]
    pub fn has_connections(&self) -> bool {
        !self.related.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelAnalysis {
    #[serde(deserialize_with = "string_or_list")]
    key_concepts: Vec<String>,
    summary: String,
    connections: Vec<ConnectionInsight>,
}

/// Explains connections between a note and its similar notes
pub struct Analyzer {
    provider: Arc<dyn ChatProvider>,
    min_similarity: f32,
    max_candidates: usize,
}

impl Analyzer {
    #[inline]
    pub fn new(provider: Arc<dyn ChatProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            min_similarity: config.min_similarity,
            max_candidates: config.max_candidates,
        }
    }

    /// Candidates above the similarity threshold, excluding the target, in rank order
    #[inline]
    pub fn filter_candidates(
        &self,
        target_id: &str,
        candidates: &[SimilarityMatch],
    ) -> Vec<SimilarityMatch> {
        let mut kept: Vec<SimilarityMatch> = candidates
            .iter()
            .filter(|c| c.candidate_id != target_id && c.similarity >= self.min_similarity)
            .cloned()
            .collect();
        kept.sort_by_key(|c| c.rank);
        kept.truncate(self.max_candidates);
        kept
    }

    /// Analyze how `target` relates to `candidates`
    ///
    /// With no candidate above the threshold the provider is not called and an
    /// explanation with no related notes is returned. A reply that is not
    /// valid JSON yields [`VaultError::AnalysisParse`] carrying the raw text.
    #[inline]
    pub async fn analyze(
        &self,
        target: &Note,
        candidates: &[SimilarityMatch],
    ) -> Result<ConnectionExplanation> {
        let filtered = self.filter_candidates(&target.id, candidates);
        if filtered.is_empty() {
            debug!("No candidates above {} for {}", self.min_similarity, target.id);
            return Ok(build_explanation(
                target,
                &filtered,
                Analysis::Structured {
                    key_concepts: Vec::new(),
                    summary: String::new(),
                    connections: Vec::new(),
                },
            ));
        }

        let prompt = build_prompt(target, &filtered);
        debug!(
            "Analyzing {} against {} candidates (prompt length: {})",
            target.id,
            filtered.len(),
            prompt.len()
        );
        let raw = self.provider.complete(SYSTEM_PROMPT, &prompt).await?;

        let parsed = parse_analysis(&raw)?;
        let connections: Vec<ConnectionInsight> = parsed
            .connections
            .into_iter()
            .filter_map(|insight| {
                let id = resolve_candidate(&insight.note, &filtered)?;
                Some(ConnectionInsight {
                    note: id.to_string(),
                    ..insight
                })
            })
            .collect();

        Ok(build_explanation(
            target,
            &filtered,
            Analysis::Structured {
                key_concepts: parsed.key_concepts,
                summary: parsed.summary.trim().to_string(),
                connections,
            },
        ))
    }

    /// Degraded explanation that keeps the model's raw reply
    #[inline]
    pub fn explain_raw(
        &self,
        target: &Note,
        candidates: &[SimilarityMatch],
        raw: String,
    ) -> ConnectionExplanation {
        let filtered = self.filter_candidates(&target.id, candidates);
        build_explanation(target, &filtered, Analysis::RawText(raw))
    }
}

fn build_explanation(
    target: &Note,
    filtered: &[SimilarityMatch],
    analysis: Analysis,
) -> ConnectionExplanation {
    let insights: &[ConnectionInsight] = match &analysis {
        Analysis::Structured { connections, .. } => connections,
        Analysis::RawText(_) => &[],
    };

    let related: Vec<RelatedNote> = filtered
        .iter()
        .map(|c| RelatedNote {
            id: c.candidate_id.clone(),
            path: c.metadata.path.clone(),
            title: c.metadata.title.clone(),
            similarity: c.similarity,
            insight: insights.iter().find(|i| i.note == c.candidate_id).cloned(),
        })
        .collect();

    let relevance = related
        .iter()
        .map(|r| r.similarity)
        .max_by(f32::total_cmp);

    ConnectionExplanation {
        source_id: target.id.clone(),
        source_title: target.title.clone(),
        related,
        analysis,
        relevance,
        generated_at: Utc::now(),
    }
}

/// Prompt asking for a JSON object describing the connections
#[inline]
pub fn build_prompt(target: &Note, candidates: &[SimilarityMatch]) -> String {
    let mut prompt = format!(
        "Analyze how the target note relates to each candidate note.\n\n\
         Target note: {}\nTitle: {}\nContent:\n{}\n\n",
        target.id,
        target.title,
        truncate_chars(&target.text, TARGET_PROMPT_CHARS)
    );

    for candidate in candidates {
        prompt.push_str(&format!(
            "Candidate note: {}\nTitle: {}\nSimilarity: {:.3}\nContent:\n{}\n\n",
            candidate.candidate_id,
            candidate.metadata.title,
            candidate.similarity,
            truncate_chars(&candidate.metadata.content, CANDIDATE_PROMPT_CHARS)
        ));
    }

    prompt.push_str(
        "Reply with JSON of this shape:\n\
         {\"key_concepts\": [\"practical concepts, tools or methods in the target note\"],\n \
         \"summary\": \"one or two sentences on how the target fits with the candidates\",\n \
         \"connections\": [{\"note\": \"<candidate note id>\", \"relationship\": \"how they are connected\", \
         \"shared_concepts\": [\"concepts in both notes\"], \
         \"practical_applications\": \"how the knowledge could be combined or applied\", \
         \"relevance\": 0.0}]}\n\
         Only include connections for the candidate notes listed above.",
    );
    prompt
}

/// Parse the model reply, tolerating prose or code fences around the object
fn parse_analysis(raw: &str) -> Result<ModelAnalysis> {
    let parse_error = || VaultError::AnalysisParse {
        raw: raw.to_string(),
    };

    let start = raw.find('{').ok_or_else(parse_error)?;
    let end = raw.rfind('}').ok_or_else(parse_error)?;
    if end < start {
        return Err(parse_error());
    }

    serde_json::from_str(&raw[start..=end]).map_err(|e| {
        warn!("Model reply is not valid analysis JSON: {}", e);
        parse_error()
    })
}

/// Match an insight's `note` to a candidate id, falling back to the title
fn resolve_candidate<'a>(note: &str, candidates: &'a [SimilarityMatch]) -> Option<&'a str> {
    let note = note.trim();
    candidates
        .iter()
        .find(|c| c.candidate_id == note)
        .or_else(|| {
            candidates
                .iter()
                .find(|c| c.metadata.title.eq_ignore_ascii_case(note))
        })
        .map(|c| c.candidate_id.as_str())
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::One(s)) => s
            .split([',', '\n'])
            .map(|part| part.trim().trim_start_matches('-').trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Some(StringOrList::Many(items)) => items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    })
}
