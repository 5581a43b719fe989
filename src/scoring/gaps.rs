//! Coverage gap arithmetic.
//!
//! A bucket is a gap when it holds no items at all, or when its share of
//! fresh (never attempted) items is below the subject's target ratio. A
//! bucket with an active generation hint is always a gap.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::domain::{SubjectProfile, TopicGap, TopicKey};

const EPSILON: f64 = 1e-9;

/// Item counts for one subject's bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCoverage {
    pub key: TopicKey,
    pub total: usize,
    pub fresh: usize,
}

/// Smallest `n >= 1` with `(fresh + n) / (total + n) >= target`, capped.
pub fn suggested_count(total: usize, fresh: usize, target: f64, cap: usize) -> usize {
    let cap = cap.max(1);
    if total == 0 {
        return 1;
    }
    if target >= 1.0 {
        return cap;
    }
    let needed = (target * total as f64 - fresh as f64) / (1.0 - target);
    let n = (needed - EPSILON).ceil().max(1.0) as usize;
    n.min(cap)
}

/// Build the gap for a bucket, or `None` when coverage meets the target.
pub fn bucket_gap(profile: &SubjectProfile, coverage: &BucketCoverage, target: f64, cap: usize) -> Option<TopicGap> {
    let fresh = coverage.fresh.min(coverage.total);
    let (fresh_ratio, severity) = if coverage.total == 0 {
        (0.0, 1.0)
    } else {
        let ratio = fresh as f64 / coverage.total as f64;
        if ratio >= target {
            return None;
        }
        (ratio, target - ratio)
    };

    Some(TopicGap {
        key: coverage.key.clone(),
        subject_id: Some(profile.subject_id),
        provider: profile.provider.clone(),
        total_items: coverage.total,
        fresh_items: fresh,
        fresh_ratio,
        target_ratio: target,
        severity,
        suggested_count: suggested_count(coverage.total, fresh, target, cap),
        subjects_affected: 1,
        focus_topics: Vec::new(),
        hinted: false,
    })
}

/// Gap for a hinted bucket. Sized as if none of its items were fresh.
pub fn hinted_gap(profile: &SubjectProfile, coverage: &BucketCoverage, target: f64, cap: usize) -> TopicGap {
    let fresh = coverage.fresh.min(coverage.total);
    let fresh_ratio = if coverage.total == 0 {
        0.0
    } else {
        fresh as f64 / coverage.total as f64
    };
    let severity = if coverage.total == 0 {
        1.0
    } else {
        (target - fresh_ratio).max(0.0)
    };
    TopicGap {
        key: coverage.key.clone(),
        subject_id: Some(profile.subject_id),
        provider: profile.provider.clone(),
        total_items: coverage.total,
        fresh_items: fresh,
        fresh_ratio,
        target_ratio: target,
        severity,
        suggested_count: suggested_count(coverage.total, 0, target, cap),
        subjects_affected: 1,
        focus_topics: Vec::new(),
        hinted: true,
    }
}

fn compare_gaps(a: &TopicGap, b: &TopicGap) -> Ordering {
    b.hinted
        .cmp(&a.hinted)
        .then_with(|| b.severity.partial_cmp(&a.severity).unwrap_or(Ordering::Equal))
        .then_with(|| a.fresh_ratio.partial_cmp(&b.fresh_ratio).unwrap_or(Ordering::Equal))
        .then_with(|| b.subjects_affected.cmp(&a.subjects_affected))
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.subject_id.cmp(&b.subject_id))
}

/// Hinted gaps first, then severity descending, fresh ratio ascending,
/// subjects affected descending and key.
pub fn sort_gaps(gaps: &mut [TopicGap]) {
    gaps.sort_by(compare_gaps);
}

/// Collapse per-subject gaps into one gap per bucket.
///
/// Totals and suggestions are summed, the fresh ratio is recomputed from the
/// sums, target is the mean of the subjects' targets and severity the worst
/// subject's severity.
pub fn merge_system_wide(gaps: Vec<TopicGap>) -> Vec<TopicGap> {
    let mut merged: BTreeMap<TopicKey, TopicGap> = BTreeMap::new();
    for gap in gaps {
        match merged.get_mut(&gap.key) {
            Some(entry) => {
                let n = entry.subjects_affected as f64;
                entry.target_ratio = (entry.target_ratio * n + gap.target_ratio) / (n + 1.0);
                entry.total_items += gap.total_items;
                entry.fresh_items += gap.fresh_items;
                entry.suggested_count += gap.suggested_count;
                entry.severity = entry.severity.max(gap.severity);
                entry.subjects_affected += 1;
                entry.hinted |= gap.hinted;
                if entry.provider != gap.provider {
                    entry.provider = None;
                }
            }
            None => {
                merged.insert(
                    gap.key.clone(),
                    TopicGap {
                        subject_id: None,
                        focus_topics: Vec::new(),
                        ..gap
                    },
                );
            }
        }
    }

    let mut out: Vec<TopicGap> = merged
        .into_values()
        .map(|mut gap| {
            gap.fresh_ratio = if gap.total_items == 0 {
                0.0
            } else {
                gap.fresh_items as f64 / gap.total_items as f64
            };
            gap
        })
        .collect();
    sort_gaps(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemKind, SubjectId};

    fn profile(id: i64) -> SubjectProfile {
        SubjectProfile::new(SubjectId(id), "it", "A1")
    }

    fn coverage(kind: ItemKind, total: usize, fresh: usize) -> BucketCoverage {
        BucketCoverage {
            key: TopicKey::new("it", "A1", kind),
            total,
            fresh,
        }
    }

    #[test]
    fn test_ten_seen_items_need_five_fresh() {
        assert_eq!(suggested_count(10, 0, 0.3, 20), 5);
        let gap = bucket_gap(&profile(1), &coverage(ItemKind::Vocabulary, 10, 0), 0.3, 20).unwrap();
        assert_eq!(gap.suggested_count, 5);
        assert_eq!(gap.fresh_ratio, 0.0);
        assert!((gap.severity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_exact_ratio_is_not_a_gap() {
        assert!(bucket_gap(&profile(1), &coverage(ItemKind::Vocabulary, 10, 3), 0.3, 20).is_none());
    }

    #[test]
    fn test_suggestion_reaches_target_exactly() {
        // (1 + 2) / (8 + 2) = 0.3
        assert_eq!(suggested_count(8, 1, 0.3, 20), 2);
    }

    #[test]
    fn test_empty_bucket_is_always_a_gap() {
        let gap = bucket_gap(&profile(1), &coverage(ItemKind::FillInBlank, 0, 0), 0.0, 20).unwrap();
        assert_eq!(gap.suggested_count, 1);
        assert_eq!(gap.severity, 1.0);
    }

    #[test]
    fn test_full_target_is_capped() {
        assert_eq!(suggested_count(4, 1, 1.0, 7), 7);
        assert_eq!(suggested_count(1000, 0, 0.9, 20), 20);
    }

    #[test]
    fn test_sort_order() {
        let mut gaps = vec![
            bucket_gap(&profile(1), &coverage(ItemKind::Vocabulary, 10, 2), 0.3, 20).unwrap(),
            bucket_gap(&profile(1), &coverage(ItemKind::QuestionAnswer, 0, 0), 0.3, 20).unwrap(),
            bucket_gap(&profile(1), &coverage(ItemKind::FillInBlank, 10, 0), 0.3, 20).unwrap(),
        ];
        sort_gaps(&mut gaps);
        assert_eq!(gaps[0].key.kind, ItemKind::QuestionAnswer);
        assert_eq!(gaps[1].key.kind, ItemKind::FillInBlank);
        assert_eq!(gaps[2].key.kind, ItemKind::Vocabulary);
    }

    #[test]
    fn test_hinted_bucket_is_forced_and_sorted_first() {
        // Fully fresh: not a gap on coverage alone
        let full = coverage(ItemKind::Vocabulary, 10, 10);
        assert!(bucket_gap(&profile(1), &full, 0.3, 20).is_none());

        let hinted = hinted_gap(&profile(1), &full, 0.3, 20);
        assert!(hinted.hinted);
        assert_eq!(hinted.suggested_count, 5);
        assert_eq!(hinted.severity, 0.0);

        let mut gaps = vec![
            bucket_gap(&profile(1), &coverage(ItemKind::QuestionAnswer, 0, 0), 0.3, 20).unwrap(),
            hinted,
        ];
        sort_gaps(&mut gaps);
        assert!(gaps[0].hinted);
        assert_eq!(gaps[0].key.kind, ItemKind::Vocabulary);
    }

    #[test]
    fn test_merge_system_wide() {
        let gaps = vec![
            bucket_gap(&profile(1), &coverage(ItemKind::Vocabulary, 10, 0), 0.3, 20).unwrap(),
            bucket_gap(&profile(2), &coverage(ItemKind::Vocabulary, 4, 1), 0.5, 20).unwrap(),
            bucket_gap(&profile(2), &coverage(ItemKind::FillInBlank, 0, 0), 0.5, 20).unwrap(),
        ];
        let merged = merge_system_wide(gaps);
        assert_eq!(merged.len(), 2);

        assert_eq!(merged[0].key.kind, ItemKind::FillInBlank);
        let vocab = &merged[1];
        assert_eq!(vocab.subject_id, None);
        assert_eq!(vocab.subjects_affected, 2);
        assert_eq!(vocab.total_items, 14);
        assert_eq!(vocab.fresh_items, 1);
        assert_eq!(vocab.suggested_count, 5 + 2);
        assert!((vocab.target_ratio - 0.4).abs() < 1e-9);
    }
}
