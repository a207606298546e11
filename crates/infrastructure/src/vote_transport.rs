use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use admission_core::{
    models::{Candidate, Vote},
    traits::VoteTransport,
    voting::vote_validator,
    AdmissionResult,
};

/// 本地模拟的投票者状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterState {
    pub term: u64,
    pub voted_for: Option<String>,
    pub log_len: u64,
    pub reachable: bool,
}

impl VoterState {
    pub fn new(log_len: u64) -> Self {
        Self {
            term: 0,
            voted_for: None,
            log_len,
            reachable: true,
        }
    }
}

/// 进程内投票传输
///
/// 每个投票者通过 [`vote_validator`] 判断候选者资格，优先维持本任期已有的
/// 承诺，否则投给日志最新的候选者（日志长度相同按 id 升序）。
/// 不可达的投票者不返回选票。
#[derive(Debug, Default)]
pub struct LocalVoteTransport {
    voters: Mutex<BTreeMap<String, VoterState>>,
}

impl LocalVoteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以相同日志长度注册一组投票者
    pub fn with_voters<I, S>(voters: I, log_len: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let voters = voters
            .into_iter()
            .map(|id| (id.into(), VoterState::new(log_len)))
            .collect();
        Self {
            voters: Mutex::new(voters),
        }
    }

    pub async fn add_voter(&self, voter_id: impl Into<String>, log_len: u64) {
        self.voters
            .lock()
            .await
            .insert(voter_id.into(), VoterState::new(log_len));
    }

    /// 模拟网络分区
    pub async fn set_reachable(&self, voter_id: &str, reachable: bool) {
        if let Some(voter) = self.voters.lock().await.get_mut(voter_id) {
            voter.reachable = reachable;
        }
    }

    pub async fn voter(&self, voter_id: &str) -> Option<VoterState> {
        self.voters.lock().await.get(voter_id).cloned()
    }
}

#[async_trait]
impl VoteTransport for LocalVoteTransport {
    async fn request_votes(
        &self,
        term: u64,
        candidates: &[Candidate],
        voters: &[String],
    ) -> AdmissionResult<Vec<Vote>> {
        let mut states = self.voters.lock().await;
        let mut votes = Vec::new();

        for voter_id in voters {
            let Some(state) = states.get_mut(voter_id) else {
                continue;
            };
            if !state.reachable {
                debug!("投票者 {} 不可达", voter_id);
                continue;
            }

            let eligible = candidates.iter().filter(|c| {
                vote_validator(
                    term,
                    state.term,
                    state.voted_for.as_deref(),
                    &c.id,
                    c.log_len,
                    state.log_len,
                )
            });
            let committed = (state.term == term)
                .then(|| state.voted_for.clone())
                .flatten();
            let choice = match committed {
                Some(existing) => candidates
                    .iter()
                    .find(|c| c.id == existing)
                    .map(|c| c.id.clone()),
                None => eligible
                    .max_by_key(|c| (c.log_len, Reverse(c.id.as_str())))
                    .map(|c| c.id.clone()),
            };

            if let Some(candidate_id) = choice {
                state.term = term;
                state.voted_for = Some(candidate_id.clone());
                votes.push(Vote::new(voter_id.as_str(), candidate_id, term));
            }
        }

        debug!("任期 {} 收集到 {} 张选票", term, votes.len());
        Ok(votes)
    }
}
