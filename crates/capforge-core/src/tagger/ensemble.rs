//! Score aggregation across one or more tagger sessions.
//!
//! Each session yields `(name, score)` rows over its own vocabulary. Rows are
//! outer-joined by name and averaged over the sessions that scored the tag;
//! a tag a session never saw contributes nothing (it is not a zero).

use std::collections::{HashMap, HashSet};

use crate::types::Tag;

/// Drop every row whose name is in `blocked`.
pub fn remove_blocked(rows: Vec<Tag>, blocked: &[String]) -> Vec<Tag> {
    if blocked.is_empty() {
        return rows;
    }
    let blocked: HashSet<&str> = blocked.iter().map(String::as_str).collect();
    rows.into_iter()
        .filter(|t| !blocked.contains(t.name.as_str()))
        .collect()
}

/// Outer-join sessions by tag name and average the available scores.
///
/// Output order is first-seen order across sessions. Within one session a
/// repeated name keeps its first score.
pub fn aggregate(sessions: &[Vec<Tag>]) -> Vec<Tag> {
    let mut order: Vec<&str> = Vec::new();
    let mut sums: HashMap<&str, (f64, u32)> = HashMap::new();

    for rows in sessions {
        let mut seen: HashSet<&str> = HashSet::with_capacity(rows.len());
        for tag in rows {
            if !seen.insert(tag.name.as_str()) {
                continue;
            }
            let entry = sums.entry(tag.name.as_str()).or_insert_with(|| {
                order.push(tag.name.as_str());
                (0.0, 0)
            });
            entry.0 += tag.score as f64;
            entry.1 += 1;
        }
    }

    order
        .into_iter()
        .map(|name| {
            let (sum, count) = sums[name];
            Tag::new(name, (sum / count as f64) as f32)
        })
        .collect()
}

/// Keep tags scoring strictly above `threshold`, highest first.
///
/// Equal scores keep their incoming order.
pub fn threshold_and_sort(tags: Vec<Tag>, threshold: f32) -> Vec<Tag> {
    let mut kept: Vec<Tag> = tags.into_iter().filter(|t| t.score > threshold).collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept
}

/// Full ensemble: block-list each session, aggregate, threshold, sort.
pub fn combine(sessions: Vec<Vec<Tag>>, blocked: &[String], threshold: f32) -> Vec<Tag> {
    let filtered: Vec<Vec<Tag>> = sessions
        .into_iter()
        .map(|rows| remove_blocked(rows, blocked))
        .collect();
    threshold_and_sort(aggregate(&filtered), threshold)
}

/// Render tags as `[name: 0.00], ` repeated, trailing separator included.
pub fn format_tag_line(tags: &[Tag]) -> String {
    tags.iter()
        .map(|t| format!("[{}: {:.2}], ", t.name, t.score))
        .collect()
}

/// Pair a raw model output vector with its vocabulary.
///
/// Extra scores beyond the vocabulary (or vice versa) are ignored.
pub fn label_scores(names: &[String], scores: &[f32]) -> Vec<Tag> {
    names
        .iter()
        .zip(scores.iter())
        .map(|(name, &score)| Tag::new(name.clone(), score))
        .collect()
}

/// The `n` highest-scoring rows, for debug logging.
pub fn top_n(rows: &[Tag], n: usize) -> Vec<Tag> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted.truncate(n);
    sorted
}
