use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use admission_core::{
    config::ElectionConfig,
    models::{Candidate, ElectionResult, Vote},
    traits::VoteTransport,
    voting::{count_votes, has_quorum, quorum, split_brain_detected},
    AdmissionError, AdmissionResult,
};

#[derive(Debug, Default)]
struct ElectionState {
    current_term: u64,
    leader: Option<String>,
}

/// 领导者选举
///
/// 只提供计票、法定票数和领导者选择原语；选票收集通过注入的
/// [`VoteTransport`] 完成，每一轮返回一批完整的选票。
pub struct LeaderElection {
    config: ElectionConfig,
    transport: Arc<dyn VoteTransport>,
    state: Mutex<ElectionState>,
}

impl LeaderElection {
    pub fn new(config: ElectionConfig, transport: Arc<dyn VoteTransport>) -> Self {
        Self {
            config,
            transport,
            state: Mutex::new(ElectionState::default()),
        }
    }

    pub async fn current_term(&self) -> u64 {
        self.state.lock().await.current_term
    }

    pub async fn current_leader(&self) -> Option<String> {
        self.state.lock().await.leader.clone()
    }

    /// 观察到更高任期时放弃领导权，返回是否发生了变化
    pub async fn step_down(&self, observed_term: u64) -> bool {
        let mut state = self.state.lock().await;
        if observed_term <= state.current_term {
            return false;
        }
        if let Some(leader) = state.leader.take() {
            warn!(
                "观察到更高任期 {} (当前 {})，领导者 {} 退位",
                observed_term, state.current_term, leader
            );
        }
        state.current_term = observed_term;
        true
    }

    /// 按配置的最大轮数运行选举
    pub async fn elect(
        &self,
        candidates: &[Candidate],
        voters: &[String],
    ) -> AdmissionResult<ElectionResult> {
        self.run_election(candidates, voters, self.config.max_rounds)
            .await
    }

    /// 运行选举
    ///
    /// 每一轮递增任期并收集选票；没有候选者达到法定票数时进入下一轮，
    /// 直到 `max_rounds` 耗尽并返回未当选结果。收集超时或传输失败的轮次
    /// 按零票处理。
    pub async fn run_election(
        &self,
        candidates: &[Candidate],
        voters: &[String],
        max_rounds: u32,
    ) -> AdmissionResult<ElectionResult> {
        if candidates.is_empty() {
            return Err(AdmissionError::invalid_argument("election requires candidates"));
        }
        if voters.is_empty() {
            return Err(AdmissionError::invalid_argument("election requires voters"));
        }

        let voter_set: HashSet<&str> = voters.iter().map(String::as_str).collect();
        let total_nodes = voter_set.len();
        let needed = quorum(total_nodes);
        let candidate_set: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let mut term = self.current_term().await;
        let mut best_count = 0;

        for round in 1..=max_rounds {
            term += 1;
            {
                let mut state = self.state.lock().await;
                state.current_term = state.current_term.max(term);
                state.leader = None;
            }
            counter!("election_rounds_total").increment(1);

            let votes = match tokio::time::timeout(
                self.config.round_timeout(),
                self.transport.request_votes(term, candidates, voters),
            )
            .await
            {
                Ok(Ok(votes)) => votes,
                Ok(Err(e)) => {
                    warn!("任期 {} 的选票收集失败: {}", term, e);
                    Vec::new()
                }
                Err(_) => {
                    warn!("任期 {} 的选票收集超时", term);
                    Vec::new()
                }
            };

            let eligible: Vec<Vote> = votes
                .into_iter()
                .filter(|v| {
                    voter_set.contains(v.voter_id.as_str())
                        && candidate_set.contains(v.candidate_id.as_str())
                })
                .collect();
            let counts = count_votes(&eligible, term);
            debug!("任期 {} 第 {} 轮计票: {:?}", term, round, counts);

            if split_brain_detected(&counts, needed) {
                let winners: Vec<String> = counts
                    .iter()
                    .filter(|(_, &count)| count >= needed)
                    .map(|(id, _)| id.clone())
                    .collect();
                counter!("election_split_brain_total").increment(1);
                return Err(AdmissionError::SplitBrain {
                    term,
                    candidates: winners,
                });
            }

            if let Some((leader, &count)) = counts
                .iter()
                .find(|(_, &count)| has_quorum(count, total_nodes))
            {
                let mut state = self.state.lock().await;
                state.current_term = state.current_term.max(term);
                state.leader = Some(leader.clone());
                info!(
                    "候选者 {} 在任期 {} 第 {} 轮当选 ({}/{} 票)",
                    leader, term, round, count, total_nodes
                );
                counter!("elections_won_total").increment(1);
                return Ok(ElectionResult {
                    leader: Some(leader.clone()),
                    term,
                    round,
                    vote_count: count,
                    has_quorum: true,
                });
            }

            best_count = counts.values().copied().max().unwrap_or(0);
        }

        warn!(
            "选举在 {} 轮后未产生领导者 (任期 {}, 最高票数 {}/{})",
            max_rounds, term, best_count, needed
        );
        Ok(ElectionResult::unelected(term, max_rounds, best_count))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    /// 所有投票者投给固定候选者
    struct UnanimousTransport(&'static str);

    #[async_trait]
    impl VoteTransport for UnanimousTransport {
        async fn request_votes(
            &self,
            term: u64,
            _candidates: &[Candidate],
            voters: &[String],
        ) -> AdmissionResult<Vec<Vote>> {
            Ok(voters.iter().map(|v| Vote::new(v.as_str(), self.0, term)).collect())
        }
    }

    fn voters(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("n{i}")).collect()
    }

    #[tokio::test]
    async fn test_unanimous_election_wins_first_round() {
        let election = LeaderElection::new(
            ElectionConfig::default(),
            Arc::new(UnanimousTransport("a")),
        );
        let result = election
            .elect(&[Candidate::new("a", 1), Candidate::new("b", 1)], &voters(3))
            .await
            .unwrap();
        assert_eq!(result.leader.as_deref(), Some("a"));
        assert_eq!(result.term, 1);
        assert_eq!(result.round, 1);
        assert_eq!(election.current_leader().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_votes_for_unknown_candidate_are_ignored() {
        let election = LeaderElection::new(
            ElectionConfig::default(),
            Arc::new(UnanimousTransport("ghost")),
        );
        let result = election
            .run_election(&[Candidate::new("a", 1)], &voters(3), 2)
            .await
            .unwrap();
        assert!(!result.is_elected());
        assert_eq!(result.round, 2);
        assert_eq!(result.term, 2);
    }

    #[tokio::test]
    async fn test_step_down_on_higher_term() {
        let election = LeaderElection::new(
            ElectionConfig::default(),
            Arc::new(UnanimousTransport("a")),
        );
        election
            .elect(&[Candidate::new("a", 1)], &voters(1))
            .await
            .unwrap();
        assert!(!election.step_down(1).await);
        assert!(election.step_down(5).await);
        assert_eq!(election.current_leader().await, None);
        assert_eq!(election.current_term().await, 5);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_rejected() {
        let election = LeaderElection::new(
            ElectionConfig::default(),
            Arc::new(UnanimousTransport("a")),
        );
        assert!(election.elect(&[], &voters(3)).await.is_err());
        assert!(election.elect(&[Candidate::new("a", 1)], &[]).await.is_err());
    }
}
