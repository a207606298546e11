use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub candidate_id: String,
    pub term: u64,
}

impl Vote {
    pub fn new(voter_id: impl Into<String>, candidate_id: impl Into<String>, term: u64) -> Self {
        Self {
            voter_id: voter_id.into(),
            candidate_id: candidate_id.into(),
            term,
        }
    }
}

/// 参选节点，`log_len` 用于判断日志是否足够新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub log_len: u64,
}

impl Candidate {
    pub fn new(id: impl Into<String>, log_len: u64) -> Self {
        Self {
            id: id.into(),
            log_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub leader: Option<String>,
    pub term: u64,
    /// 当选所在的轮次（从 1 开始），未当选时为已执行的轮数
    pub round: u32,
    pub vote_count: usize,
    pub has_quorum: bool,
}

impl ElectionResult {
    pub fn unelected(term: u64, round: u32, vote_count: usize) -> Self {
        Self {
            leader: None,
            term,
            round,
            vote_count,
            has_quorum: false,
        }
    }

    pub fn is_elected(&self) -> bool {
        self.leader.is_some()
    }
}
