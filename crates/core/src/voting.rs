//! 投票与法定票数原语，不依赖任何传输实现。

use std::collections::{BTreeMap, HashSet};

use crate::models::Vote;

/// 法定票数：严格多数
pub fn quorum(total_nodes: usize) -> usize {
    total_nodes / 2 + 1
}

pub fn has_quorum(votes: usize, total_nodes: usize) -> bool {
    votes >= quorum(total_nodes)
}

/// 统计当前任期的选票
///
/// 过期任期的选票被忽略；同一投票者在同一任期只计第一张票。
pub fn count_votes(votes: &[Vote], term: u64) -> BTreeMap<String, usize> {
    let mut seen_voters = HashSet::new();
    let mut counts = BTreeMap::new();
    for vote in votes.iter().filter(|v| v.term == term) {
        if seen_voters.insert(vote.voter_id.as_str()) {
            *counts.entry(vote.candidate_id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// 投票校验
///
/// 仅当候选者任期不低于投票者任期、投票者在该任期未承诺给其他候选者、
/// 且候选者日志至少与投票者一样新时才授予选票。
pub fn vote_validator(
    candidate_term: u64,
    voter_term: u64,
    voted_for: Option<&str>,
    candidate_id: &str,
    candidate_log_len: u64,
    voter_log_len: u64,
) -> bool {
    if candidate_term < voter_term {
        return false;
    }
    // 更高的任期会清空之前的承诺
    if candidate_term == voter_term {
        if let Some(existing) = voted_for {
            if existing != candidate_id {
                return false;
            }
        }
    }
    candidate_log_len >= voter_log_len
}

/// 多于一个候选者同时达到法定票数
pub fn split_brain_detected(leader_counts: &BTreeMap<String, usize>, quorum: usize) -> bool {
    leader_counts.values().filter(|&&count| count >= quorum).count() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_is_strict_majority() {
        assert!(has_quorum(6, 10));
        assert!(!has_quorum(5, 10));
        assert!(has_quorum(3, 5));
        assert!(!has_quorum(2, 5));
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(4), 3);
    }

    #[test]
    fn test_count_votes_ignores_stale_terms() {
        let votes = vec![
            Vote::new("n1", "a", 3),
            Vote::new("n2", "a", 3),
            Vote::new("n3", "b", 2),
            Vote::new("n4", "b", 3),
        ];
        let counts = count_votes(&votes, 3);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
    }

    #[test]
    fn test_count_votes_one_vote_per_voter() {
        let votes = vec![
            Vote::new("n1", "a", 1),
            Vote::new("n1", "b", 1),
            Vote::new("n1", "a", 1),
        ];
        let counts = count_votes(&votes, 1);
        assert_eq!(counts.get("a"), Some(&1));
        assert_eq!(counts.get("b"), None);
    }

    #[test]
    fn test_vote_validator() {
        // stale candidate term
        assert!(!vote_validator(2, 3, None, "a", 10, 10));
        // already committed to another candidate in the same term
        assert!(!vote_validator(3, 3, Some("b"), "a", 10, 10));
        // repeated grant to the same candidate
        assert!(vote_validator(3, 3, Some("a"), "a", 10, 10));
        // higher term clears the previous commitment
        assert!(vote_validator(4, 3, Some("b"), "a", 10, 10));
        // candidate log behind the voter
        assert!(!vote_validator(4, 3, None, "a", 9, 10));
        assert!(vote_validator(4, 3, None, "a", 11, 10));
    }

    #[test]
    fn test_split_brain_detection() {
        let mut counts = BTreeMap::new();
        counts.insert("a".to_string(), 3);
        counts.insert("b".to_string(), 2);
        assert!(!split_brain_detected(&counts, 3));
        counts.insert("b".to_string(), 3);
        assert!(split_brain_detected(&counts, 3));
    }
}
