//! Task classification over the capability descriptor set
//!
//! `classify` is a pure function of the task, its artifact, the prior
//! history and the compiled routing table. It never calls a specialist.

use super::types::{Classification, PlannedStep};
use crate::artifact::ArtifactRef;
use crate::error::{Error, Result};
use crate::registry::{ArtifactRequirement, CapabilityDescriptor, Modality};
use crate::session::{Turn, TurnRole};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Splits a task into clauses on conjunctions and punctuation
static CLAUSE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[;,.!?](?:\s+|$)|\b(?:and\s+then|after\s+that|then|and|also)\b\s*")
        .expect("CLAUSE_SPLIT is a compile-time constant")
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}$%]+").expect("WORD is a compile-time constant"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "what", "was", "were", "are", "is", "it", "its",
    "from", "into", "about", "please", "can", "you", "me", "my", "your", "our", "did", "does",
    "have", "has", "had", "tell", "show", "give", "again", "there", "their", "which", "who", "how",
    "why", "when", "where", "then", "also", "any", "all", "of", "on", "in", "to", "a", "an",
];

const DOCUMENT_WORDS: &[&str] = &[
    "document", "pdf", "file", "page", "scan", "invoice", "receipt", "contract", "form",
];
const IMAGE_WORDS: &[&str] = &["image", "photo", "picture", "screenshot", "png", "jpg", "jpeg"];
const LIVE_FRAME_WORDS: &[&str] = &["video", "frame", "webcam", "camera", "live", "stream"];

/// Words that ask to recall something rather than name what to recall
const RECALL_WORDS: &[&str] = &[
    "remind", "recall", "repeat", "remember", "earlier", "before", "said", "mentioned", "again",
];

const MAX_DIRECT_LINES: usize = 5;

struct Route {
    id: String,
    purpose: String,
    modalities: Vec<Modality>,
    artifact: ArtifactRequirement,
    patterns: Vec<(Regex, usize)>,
}

impl Route {
    fn score(&self, text: &str) -> usize {
        self.patterns
            .iter()
            .filter(|(regex, _)| regex.is_match(text))
            .map(|(_, weight)| weight)
            .sum()
    }
}

/// Keyword patterns compiled once from the registry's descriptors
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    /// Compile a routing table, keeping descriptor order
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a keyword cannot be compiled.
    pub fn new<'a>(descriptors: impl IntoIterator<Item = &'a CapabilityDescriptor>) -> Result<Self> {
        let mut routes = Vec::new();
        for descriptor in descriptors {
            let mut patterns = Vec::with_capacity(descriptor.keywords.len());
            for keyword in &descriptor.keywords {
                let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
                if words.is_empty() {
                    continue;
                }
                let word_end = keyword
                    .trim_end()
                    .ends_with(|c: char| c.is_alphanumeric() || c == '_');
                let end = if word_end { r"\b" } else { "" };
                let pattern = format!(r"(?i)\b{}{}", words.join(r"\s+"), end);
                let regex = Regex::new(&pattern).map_err(|e| Error::InvalidConfig {
                    field: format!("{}.keywords", descriptor.id),
                    message: e.to_string(),
                })?;
                patterns.push((regex, words.len()));
            }
            routes.push(Route {
                id: descriptor.id.clone(),
                purpose: descriptor.purpose.clone(),
                modalities: descriptor.modalities.clone(),
                artifact: descriptor.artifact,
                patterns,
            });
        }
        Ok(Self { routes })
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Keyword score of one specialist for `text`, 0 if unknown or unmatched
    #[must_use]
    pub fn score(&self, specialist_id: &str, text: &str) -> usize {
        self.routes
            .iter()
            .find(|r| r.id == specialist_id)
            .map_or(0, |r| r.score(text))
    }

    fn scores(&self, clause: &str) -> Vec<(usize, usize)> {
        self.routes
            .iter()
            .enumerate()
            .map(|(index, route)| (index, route.score(clause)))
            .filter(|(_, score)| *score > 0)
            .collect()
    }

    fn capabilities(&self) -> String {
        self.routes
            .iter()
            .map(|r| format!("- {}: {}", r.id, r.purpose))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| &r.id))
            .finish()
    }
}

enum ClauseRoute {
    Matched(usize),
    Ambiguous(Vec<usize>),
    Unmatched,
}

/// Split a task into trimmed, non-empty clauses
#[must_use]
pub fn split_clauses(task: &str) -> Vec<&str> {
    CLAUSE_SPLIT
        .split(task)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Lowercase content words of `text`, stopwords and short tokens removed
#[must_use]
pub fn content_words(text: &str) -> HashSet<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Modality named by words in the clause, if exactly one is named
#[must_use]
pub fn stated_modality(clause: &str) -> Option<Modality> {
    let words: Vec<String> = WORD
        .find_iter(clause)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    let count = |vocabulary: &[&str]| {
        words
            .iter()
            .filter(|w| vocabulary.iter().any(|v| names(w, v)))
            .count()
    };

    let counts = [
        (Modality::Document, count(DOCUMENT_WORDS)),
        (Modality::Image, count(IMAGE_WORDS)),
        (Modality::LiveFrame, count(LIVE_FRAME_WORDS)),
    ];
    let best = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if best == 0 {
        return None;
    }
    let mut leaders = counts.iter().filter(|(_, n)| *n == best);
    match (leaders.next(), leaders.next()) {
        (Some((modality, _)), None) => Some(*modality),
        _ => None,
    }
}

/// `word` is `noun` or its plural
fn names(word: &str, noun: &str) -> bool {
    match word.strip_prefix(noun) {
        Some(rest) => matches!(rest, "" | "s" | "es"),
        None => false,
    }
}

fn route_clause(table: &RoutingTable, clause: &str, artifact: Option<&ArtifactRef>) -> ClauseRoute {
    let scores = table.scores(clause);
    let Some(top) = scores.iter().map(|(_, s)| *s).max() else {
        return ClauseRoute::Unmatched;
    };
    let leaders: Vec<usize> = scores
        .iter()
        .filter(|(_, s)| *s == top)
        .map(|(i, _)| *i)
        .collect();
    if leaders.len() == 1 {
        return ClauseRoute::Matched(leaders[0]);
    }

    let modality = stated_modality(clause).or_else(|| artifact.and_then(ArtifactRef::modality));
    let Some(modality) = modality else {
        return ClauseRoute::Ambiguous(leaders);
    };

    let handling: Vec<usize> = leaders
        .iter()
        .copied()
        .filter(|i| table.routes[*i].modalities.contains(&modality))
        .collect();
    let Some(narrowest) = handling
        .iter()
        .map(|i| table.routes[*i].modalities.len())
        .min()
    else {
        return ClauseRoute::Ambiguous(leaders);
    };
    let narrowest: Vec<usize> = handling
        .into_iter()
        .filter(|i| table.routes[*i].modalities.len() == narrowest)
        .collect();

    if narrowest.len() == 1 {
        ClauseRoute::Matched(narrowest[0])
    } else {
        ClauseRoute::Ambiguous(narrowest)
    }
}

/// Specialist that can turn the attached artifact into text for a context consumer
fn producer_for(table: &RoutingTable, artifact: &ArtifactRef) -> Option<usize> {
    let modality = artifact.modality()?;
    table
        .routes
        .iter()
        .enumerate()
        .filter(|(_, r)| r.artifact != ArtifactRequirement::Forbidden && r.modalities.contains(&modality))
        .min_by_key(|(_, r)| r.modalities.len())
        .map(|(i, _)| i)
}

fn direct_answer(task: &str, history: &[Turn]) -> Option<String> {
    let mut wanted = content_words(task);
    wanted.retain(|w| !RECALL_WORDS.contains(&w.as_str()));
    if wanted.is_empty() {
        return None;
    }

    let mut seen = HashSet::new();
    let mut covered: HashSet<String> = HashSet::new();
    let mut lines = Vec::new();
    'turns: for turn in history.iter().rev() {
        let answered = turn.role == TurnRole::FinalAnswer || turn.is_success();
        if !answered {
            continue;
        }
        for line in turn.content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let words = content_words(line);
            if words.is_disjoint(&wanted) || !seen.insert(line) {
                continue;
            }
            covered.extend(words.intersection(&wanted).cloned());
            lines.push(line);
            if lines.len() == MAX_DIRECT_LINES {
                break 'turns;
            }
        }
    }

    // More than half of what the task asks about must appear in history.
    if covered.len() * 2 <= wanted.len() {
        return None;
    }
    Some(format!(
        "From earlier in this conversation:\n{}",
        lines.join("\n")
    ))
}

/// Classify a task
///
/// `history` holds the session's turns before this task.
#[must_use]
pub fn classify(
    task: &str,
    artifact: Option<&ArtifactRef>,
    history: &[Turn],
    table: &RoutingTable,
) -> Classification {
    let mut steps: Vec<PlannedStep> = Vec::new();

    for clause in split_clauses(task) {
        match route_clause(table, clause, artifact) {
            ClauseRoute::Matched(index) => {
                let id = &table.routes[index].id;
                match steps.last_mut() {
                    Some(last) if &last.specialist_id == id => {
                        last.instruction.push_str(" and ");
                        last.instruction.push_str(clause);
                    }
                    _ => steps.push(PlannedStep::new(id.clone(), clause)),
                }
            }
            ClauseRoute::Ambiguous(candidates) => {
                let names: Vec<&str> = candidates
                    .iter()
                    .map(|i| table.routes[*i].id.as_str())
                    .collect();
                return Classification::Clarify(format!(
                    "\"{}\" could be handled by {}. Which one should I use, or can you say \
                     whether this is about a document, an image or a live video frame?",
                    clause,
                    names.join(" or ")
                ));
            }
            ClauseRoute::Unmatched => {}
        }
    }

    if steps.is_empty() {
        if let Some(answer) = direct_answer(task, history) {
            return Classification::Direct(answer);
        }
        return Classification::Clarify(format!(
            "I'm not sure which capability fits this request. I can help with:\n{}",
            table.capabilities()
        ));
    }

    // A context consumer cannot take the artifact itself, so read it first.
    if let Some(artifact) = artifact {
        let consumes_first = table
            .routes
            .iter()
            .find(|r| r.id == steps[0].specialist_id)
            .is_some_and(|r| r.artifact == ArtifactRequirement::Forbidden);
        let artifact_used = steps.iter().any(|step| {
            table
                .routes
                .iter()
                .any(|r| r.id == step.specialist_id && r.artifact != ArtifactRequirement::Forbidden)
        });
        if consumes_first && !artifact_used {
            if let Some(index) = producer_for(table, artifact) {
                steps.insert(0, PlannedStep::new(table.routes[index].id.clone(), task.trim()));
            }
        }
    }

    if steps.len() == 1 {
        Classification::Invoke(steps.remove(0))
    } else {
        Classification::InvokeSequence(steps)
    }
}
