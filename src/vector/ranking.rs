use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

use crate::vector::{canonicalize, CandidateMatch, DedupedResult, TARGET_VECTOR};

/// Ranking order for candidates: similarity descending, then newest first, then
/// embedding id ascending so equal rows never depend on input order.
fn rank_order(a: &CandidateMatch, b: &CandidateMatch) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| match (&a.created_at, &b.created_at) {
            (Some(a), Some(b)) => b.cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts candidates by similarity and keeps the best one per canonical identity.
///
/// Candidates without a key are dropped. The result is in descending similarity
/// order and contains each canonical key at most once.
pub fn dedupe(mut candidates: Vec<CandidateMatch>) -> Vec<DedupedResult> {
    candidates.sort_by(rank_order);

    let mut seen: HashSet<String> = HashSet::new();
    let mut results = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = match candidate.key {
            Some(key) if !key.is_empty() => key,
            _ => {
                debug!(target: TARGET_VECTOR, "Skipping embedding {} without a key", candidate.id);
                continue;
            }
        };

        let canonical = canonicalize(&key).unwrap_or(&key).to_string();
        if !seen.insert(canonical.clone()) {
            debug!(target: TARGET_VECTOR,
                "Dropping duplicate {} (similarity {:.4}) of canonical key {}",
                key, candidate.similarity, canonical);
            continue;
        }

        results.push(DedupedResult {
            similarity: candidate.similarity,
            embedding_id: candidate.id,
            key,
            base_key: Some(canonical),
            created_at: candidate.created_at,
            cluster_id: candidate.cluster_id,
            article: None,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str, key: &str, similarity: f64) -> CandidateMatch {
        CandidateMatch {
            id: id.to_string(),
            key: Some(key.to_string()),
            similarity,
            cluster_id: None,
            created_at: None,
        }
    }

    fn keys(results: &[DedupedResult]) -> Vec<&str> {
        results.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_keeps_highest_similarity_per_canonical_key() {
        let results = dedupe(vec![
            candidate("1", "src_A_1", 0.9),
            candidate("2", "src_B_2", 0.7),
            candidate("3", "other_1", 0.95),
        ]);

        assert_eq!(keys(&results), vec!["other_1", "src_B_2"]);
        assert_eq!(results[0].base_key.as_deref(), Some("1"));
        assert_eq!(results[0].similarity, 0.95);
        assert_eq!(results[1].base_key.as_deref(), Some("2"));
    }

    #[test]
    fn test_shared_suffix_collapses_all_sources() {
        // All three keys end in "_1", so they are the same article.
        let results = dedupe(vec![
            candidate("1", "src_A_1", 0.9),
            candidate("2", "src_B_1", 0.7),
            candidate("3", "other_1", 0.95),
        ]);

        assert_eq!(keys(&results), vec!["other_1"]);
    }

    #[test]
    fn test_output_is_sorted_and_unique() {
        let input = vec![
            candidate("a", "x_10", 0.71),
            candidate("b", "y_11", 0.88),
            candidate("c", "z_10", 0.93),
            candidate("d", "12", 0.80),
            candidate("e", "w_11", 0.72),
            candidate("f", "v_12", 0.99),
        ];
        let results = dedupe(input);

        assert_eq!(keys(&results), vec!["v_12", "z_10", "y_11"]);
        assert!(results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity));

        let mut bases: Vec<_> = results.iter().filter_map(|r| r.base_key.clone()).collect();
        bases.sort();
        bases.dedup();
        assert_eq!(bases.len(), results.len());
    }

    #[test]
    fn test_skips_missing_and_empty_keys() {
        let mut keyless = candidate("1", "", 0.99);
        keyless.key = None;
        let results = dedupe(vec![
            keyless,
            candidate("2", "", 0.98),
            candidate("3", "feed_7", 0.5),
        ]);

        assert_eq!(keys(&results), vec!["feed_7"]);
    }

    #[test]
    fn test_ties_prefer_newest_then_lowest_id() {
        let older = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 10, 2, 0, 0, 0).unwrap();

        let mut a = candidate("b-old", "feed_9", 0.8);
        a.created_at = Some(older);
        let mut b = candidate("a-new", "wire_9", 0.8);
        b.created_at = Some(newer);
        let undated = candidate("0", "mirror_9", 0.8);

        let results = dedupe(vec![a.clone(), undated.clone(), b.clone()]);
        assert_eq!(keys(&results), vec!["wire_9"]);

        // Input order must not matter.
        let results = dedupe(vec![b, undated, a]);
        assert_eq!(keys(&results), vec!["wire_9"]);

        let results = dedupe(vec![
            candidate("z", "feed_4", 0.6),
            candidate("m", "wire_4", 0.6),
        ]);
        assert_eq!(results[0].embedding_id, "m");
    }

    #[test]
    fn test_carries_row_metadata() {
        let mut row = candidate("emb-1", "ap_555", 0.77);
        row.cluster_id = Some(12);
        let results = dedupe(vec![row]);

        assert_eq!(results[0].embedding_id, "emb-1");
        assert_eq!(results[0].cluster_id, Some(12));
        assert!(results[0].article.is_none());
    }

    #[test]
    fn test_empty_input() {
        assert!(dedupe(Vec::new()).is_empty());
    }
}
