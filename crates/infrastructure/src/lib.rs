//! 协作接口的进程内实现与指标导出

pub mod memory_store;
pub mod observability;
pub mod vote_transport;

pub use memory_store::{
    InMemoryBreakerStateStore, InMemoryCheckpointStore, InMemoryPolicyHistoryStore,
};
pub use observability::{describe_metrics, init_metrics};
pub use vote_transport::{LocalVoteTransport, VoterState};
