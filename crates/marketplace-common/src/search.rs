/// Fuzzy ranking of project records against a free-text query.
///
/// Each record is scored independently against its title and its abstract with
/// token-sort similarity; the better of the two is the record's score. Records
/// below the threshold are dropped and the rest are returned best-first. Ties
/// keep their input order. The threshold is applied to the unrounded
/// similarity; the reported score is rounded.
use tracing::debug;

use crate::model::{ProjectRecord, ScoredRecord};
use crate::similarity::{to_score, token_sort_similarity};

pub const DEFAULT_THRESHOLD: u8 = 60;

/// Score a single record: max of title and abstract similarity, rounded.
pub fn score(query: &str, record: &ProjectRecord) -> u8 {
    to_score(similarity(query, record))
}

fn similarity(query: &str, record: &ProjectRecord) -> f64 {
    let title = token_sort_similarity(query, record.title());
    let abstract_text = token_sort_similarity(query, record.abstract_text());
    title.max(abstract_text)
}

/// Rank `records` against `query`, keeping those scoring at least `threshold`.
///
/// The inputs are never modified; each returned entry owns a copy of its record.
pub fn rank(query: &str, records: &[ProjectRecord], threshold: u8) -> Vec<ScoredRecord> {
    let mut matches: Vec<ScoredRecord> = records
        .iter()
        .filter_map(|record| {
            let raw = similarity(query, record);
            if raw < f64::from(threshold) {
                return None;
            }
            let similarity_score = to_score(raw);
            let mut record = record.clone();
            record.0.remove("similarity_score");
            Some(ScoredRecord {
                record,
                similarity_score,
            })
        })
        .collect();

    // stable: equal scores keep input order
    matches.sort_by(|a, b| b.similarity_score.cmp(&a.similarity_score));

    debug!(
        query,
        candidates = records.len(),
        matches = matches.len(),
        threshold,
        "ranked projects"
    );
    matches
}
