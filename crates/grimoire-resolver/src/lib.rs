//! Hybrid keyword + semantic resolution of a free-form query to an
//! indexed spell.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use grimoire_domain::error::{Error, Result};
use grimoire_domain::spell::SpellConfig;
use grimoire_embed::EmbeddingService;
use grimoire_store::EmbeddingStore;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "be", "have", "has", "had", "do", "does", "did", "will",
    "would", "should", "could", "may", "might", "can", "my", "i", "you", "we", "they", "it",
    "this", "that", "these", "those", "about",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Keyword,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct ResolvedMatch {
    pub name: String,
    pub confidence: f32,
    pub match_type: MatchType,
}

struct IndexedSpell {
    config: SpellConfig,
    normalized_keywords: HashSet<String>,
}

/// Stateful hybrid resolver: holds an in-memory keyword index plus
/// read access to the persistent vector store and the embedding service.
pub struct HybridResolver {
    indexed: RwLock<HashMap<String, IndexedSpell>>,
    store: Arc<EmbeddingStore>,
}

impl HybridResolver {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self {
            indexed: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Indexes (or re-indexes) `config`. Re-embeds only if the content
    /// hash changed since the last index.
    pub fn index(&self, config: &SpellConfig, embedder: &EmbeddingService) -> Result<()> {
        let hash = config.content_hash();
        if self.store.needs_update(&config.name, &hash) {
            let vector = embedder.embed(&config.embedding_text())?;
            let timestamp = now_millis();
            self.store.set(&config.name, vector, hash, timestamp);
            self.store.save()?;
        }

        let normalized_keywords = config
            .keywords
            .iter()
            .map(|k| normalize_token(k))
            .filter(|k| !k.is_empty())
            .collect();

        self.indexed.write().insert(
            config.name.clone(),
            IndexedSpell {
                config: config.clone(),
                normalized_keywords,
            },
        );
        Ok(())
    }

    /// Removes `name` from both the in-memory index and the store.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.indexed.write().remove(name);
        self.store.delete(name);
        self.store.save()?;
        Ok(())
    }

    pub fn indexed_names(&self) -> Vec<String> {
        self.indexed.read().keys().cloned().collect()
    }

    pub fn get_config(&self, name: &str) -> Option<SpellConfig> {
        self.indexed.read().get(name).map(|s| s.config.clone())
    }

    /// Resolves `query` against every indexed (or merely stored) spell,
    /// returning up to `n` matches sorted by descending confidence.
    pub fn resolve_top_n(
        &self,
        query: &str,
        n: usize,
        min_confidence: f32,
        embedder: &EmbeddingService,
    ) -> Result<Vec<ResolvedMatch>> {
        let trimmed = validate_query(query)?;

        let meaningful = meaningful_words(trimmed);

        let indexed = self.indexed.read();
        let query_vector = embedder.embed(trimmed).ok();

        let mut candidate_names: HashSet<&str> =
            indexed.keys().map(String::as_str).collect();
        let stored = self.store.get_all();
        for name in stored.keys() {
            candidate_names.insert(name.as_str());
        }

        let mut matches = Vec::new();
        for name in candidate_names {
            let (match_count, exact_count) = match indexed.get(name) {
                Some(entry) => score_keywords(&meaningful, &entry.normalized_keywords),
                None => (0, 0),
            };
            let keyword_score = if match_count > 0 {
                Some(keyword_score(match_count, exact_count, meaningful.len()))
            } else {
                None
            };

            let semantic_score = match (&query_vector, stored.get(name)) {
                (Some(qv), Some(record)) => grimoire_vector::cosine(qv, &record.vector).ok(),
                _ => None,
            };

            if let Some((confidence, match_type)) =
                classify(keyword_score, match_count, semantic_score)
            {
                if confidence >= min_confidence {
                    matches.push(ResolvedMatch {
                        name: name.to_string(),
                        confidence,
                        match_type,
                    });
                }
            }
        }

        matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        matches.truncate(n);
        Ok(matches)
    }
}

/// Trims `query` and rejects it if empty, per §4.4.6.
fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyQuery);
    }
    Ok(trimmed)
}

fn normalize_token(s: &str) -> String {
    s.trim().to_lowercase()
}

fn meaningful_words(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Returns `(matchCount, exactCount)` for the keyword scoring rules in
/// §4.4.3: one match per query word, preferring exact equality, then
/// keyword-contains-query (len >= 3), then query-contains-keyword (len >= 3).
fn score_keywords(meaningful: &[String], keywords: &HashSet<String>) -> (usize, usize) {
    let mut match_count = 0;
    let mut exact_count = 0;
    for word in meaningful {
        let mut matched = false;
        if keywords.contains(word) {
            exact_count += 1;
            matched = true;
        } else if word.len() >= 3 {
            for kw in keywords.iter().filter(|k| k.len() > 2) {
                if kw.contains(word.as_str()) || word.contains(kw.as_str()) {
                    matched = true;
                    break;
                }
            }
        }
        if matched {
            match_count += 1;
        }
    }
    (match_count, exact_count)
}

fn keyword_score(match_count: usize, exact_count: usize, meaningful_len: usize) -> f32 {
    let ratio = match_count as f32 / meaningful_len.max(1) as f32;
    let exact_boost = if exact_count > 0 { 0.05 } else { 0.0 };
    let weak_penalty = if match_count == 1 && meaningful_len > 3 {
        0.10
    } else {
        0.0
    };
    (0.9 + 0.1 * ratio + exact_boost - weak_penalty).min(1.0)
}

fn classify(
    keyword_score: Option<f32>,
    match_count: usize,
    semantic_score: Option<f32>,
) -> Option<(f32, MatchType)> {
    let s = semantic_score.unwrap_or(0.0);
    if let Some(k) = keyword_score {
        if match_count >= 2 && k > 0.5 {
            return Some((k, MatchType::Keyword));
        }
        if match_count == 1 && k > 0.5 && s > 0.35 {
            let confidence = (k.max(0.7) + 0.2 * s).min(1.0);
            return Some((confidence, MatchType::Hybrid));
        }
        if k > 0.5 {
            return Some((k, MatchType::Keyword));
        }
    }
    if s > 0.3 {
        return Some((s, MatchType::Semantic));
    }
    None
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meaningful_words_filters_stop_words_and_short_tokens() {
        let words = meaningful_words("what is the weather like today");
        assert_eq!(words, vec!["weather", "like", "today"]);
    }

    #[test]
    fn keyword_score_rewards_exact_matches() {
        let exact = keyword_score(2, 2, 2);
        let fuzzy = keyword_score(2, 0, 2);
        assert!(exact > fuzzy);
    }

    #[test]
    fn keyword_score_penalizes_single_weak_match_on_long_query() {
        let weak = keyword_score(1, 0, 5);
        let strong = keyword_score(1, 0, 2);
        assert!(weak < strong);
    }

    #[test]
    fn classify_discards_below_thresholds() {
        assert!(classify(Some(0.2), 1, Some(0.1)).is_none());
        assert!(classify(None, 0, Some(0.2)).is_none());
    }

    #[test]
    fn classify_prefers_keyword_with_two_matches() {
        let (confidence, match_type) = classify(Some(0.95), 2, Some(0.9)).unwrap();
        assert_eq!(confidence, 0.95);
        assert!(matches!(match_type, MatchType::Keyword));
    }

    #[test]
    fn classify_hybrid_for_single_match_with_semantic_support() {
        let (_, match_type) = classify(Some(0.6), 1, Some(0.5)).unwrap();
        assert!(matches!(match_type, MatchType::Hybrid));
    }

    #[test]
    fn classify_semantic_only_above_threshold() {
        let (confidence, match_type) = classify(None, 0, Some(0.4)).unwrap();
        assert_eq!(confidence, 0.4);
        assert!(matches!(match_type, MatchType::Semantic));
    }

    #[test]
    fn score_keywords_counts_contains_matches_for_long_words() {
        let keywords: HashSet<String> = ["forecast".to_string()].into_iter().collect();
        let words = vec!["forecasting".to_string()];
        let (match_count, exact_count) = score_keywords(&words, &keywords);
        assert_eq!(match_count, 1);
        assert_eq!(exact_count, 0);
    }

    #[test]
    fn score_keywords_ignores_short_keywords() {
        let keywords: HashSet<String> = ["ai".to_string()].into_iter().collect();
        let words = vec!["ai".to_string()];
        // "ai" the keyword has len 2, so it's ignored entirely per contract
        // unless exact match still counts (exact check happens before the
        // length filter on contains-matching, per §4.4.3 rule 1).
        let (match_count, _) = score_keywords(&words, &keywords);
        assert_eq!(match_count, 1);
    }

    #[test]
    fn validate_query_rejects_blank_input() {
        assert!(matches!(validate_query("   "), Err(Error::EmptyQuery)));
        assert!(matches!(validate_query(""), Err(Error::EmptyQuery)));
        assert_eq!(validate_query("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn indexed_names_empty_for_fresh_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EmbeddingStore::load(dir.path().join("s.msgpack"), "m", 384));
        let resolver = HybridResolver::new(store);
        assert!(resolver.indexed_names().is_empty());
    }
}
