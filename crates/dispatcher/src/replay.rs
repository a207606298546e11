use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use admission_core::{
    config::ReplayConfig,
    models::{Checkpoint, HaltedStream, RecordOutcome, ReplayEvent, ReplayReport},
    traits::{CheckpointStore, EventApplier},
    AdmissionError, AdmissionResult,
};

/// 单个流的检查点游标
#[derive(Debug, Clone)]
struct Cursor {
    /// 流的持久化起点（首个已知序列）
    origin: u64,
    /// 从起点开始连续记录的最高序列，即持久化检查点
    watermark: u64,
    /// 已观察到的最高序列
    highest: u64,
    /// 高于 watermark 的已记录序列
    pending: BTreeSet<u64>,
}

impl Cursor {
    fn new(sequence: u64) -> Self {
        Self {
            origin: sequence,
            watermark: sequence,
            highest: sequence,
            pending: BTreeSet::new(),
        }
    }

    fn contains(&self, sequence: u64) -> bool {
        (self.origin..=self.watermark).contains(&sequence) || self.pending.contains(&sequence)
    }

    fn insert(&mut self, sequence: u64) -> RecordOutcome {
        let outcome = if sequence > self.highest {
            self.highest = sequence;
            RecordOutcome::Advanced
        } else {
            RecordOutcome::GapFilled
        };
        self.pending.insert(sequence);
        while let Some(next) = self.watermark.checked_add(1) {
            if !self.pending.remove(&next) {
                break;
            }
            self.watermark = next;
        }
        outcome
    }

    fn gaps(&self) -> Vec<u64> {
        match self.watermark.checked_add(1) {
            Some(first) => (first..self.highest)
                .filter(|seq| !self.pending.contains(seq))
                .collect(),
            None => Vec::new(),
        }
    }

    /// watermark 之后的第一个序列，序列空间耗尽时停在 `u64::MAX`
    fn resume_position(&self) -> u64 {
        self.watermark.saturating_add(1)
    }
}

#[derive(Debug, Default)]
struct StreamState {
    cursor: Option<Cursor>,
    /// 已应用但检查点尚未写入的幂等键及其序列
    unrecorded: HashMap<String, u64>,
}

/// 检查点与重放协调器
///
/// 每个流有独立的锁：不同流的记录互不阻塞，同一流的记录串行执行。
/// 读取 (`stream_sequences`, `detect_gaps`) 与写入使用相同的锁。
/// 持有流锁期间会调用存储与事件应用方，它们不得回调本协调器。
pub struct CheckpointReplayCoordinator {
    config: ReplayConfig,
    store: Arc<dyn CheckpointStore>,
    applier: Arc<dyn EventApplier>,
    streams: RwLock<HashMap<String, Arc<Mutex<StreamState>>>>,
}

impl CheckpointReplayCoordinator {
    pub fn new(
        config: ReplayConfig,
        store: Arc<dyn CheckpointStore>,
        applier: Arc<dyn EventApplier>,
    ) -> Self {
        Self {
            config,
            store,
            applier,
            streams: RwLock::new(HashMap::new()),
        }
    }

    async fn stream(&self, stream_id: &str) -> Arc<Mutex<StreamState>> {
        let mut streams = self.streams.write().await;
        streams
            .entry(stream_id.to_string())
            .or_default()
            .clone()
    }

    async fn existing_stream(&self, stream_id: &str) -> Option<Arc<Mutex<StreamState>>> {
        self.streams.read().await.get(stream_id).cloned()
    }

    /// 持久化并推进流的检查点
    pub async fn record(&self, stream_id: &str, sequence: u64) -> AdmissionResult<RecordOutcome> {
        let stream = self.stream(stream_id).await;
        let mut state = stream.lock().await;
        self.record_locked(&mut state, stream_id, sequence).await
    }

    /// 校验序列：致命错误返回 Err，已记录返回 `Duplicate`
    fn check_sequence(
        &self,
        cursor: Option<&Cursor>,
        stream_id: &str,
        sequence: u64,
    ) -> AdmissionResult<Option<RecordOutcome>> {
        let Some(cursor) = cursor else {
            return Ok(None);
        };
        if sequence < cursor.origin {
            error!(
                "流 {} 的序列 {} 早于持久化起点 {}",
                stream_id, sequence, cursor.origin
            );
            return Err(AdmissionError::SequenceRegression {
                stream_id: stream_id.to_string(),
                sequence,
                origin: cursor.origin,
            });
        }
        if cursor.contains(sequence) {
            return Ok(Some(RecordOutcome::Duplicate));
        }
        if sequence > cursor.highest.saturating_add(self.config.max_gap_window) {
            error!(
                "流 {} 从 {} 跳到 {}，超出修复窗口 {}",
                stream_id, cursor.highest, sequence, self.config.max_gap_window
            );
            return Err(AdmissionError::GapBeyondRepairWindow {
                stream_id: stream_id.to_string(),
                highest: cursor.highest,
                sequence,
                window: self.config.max_gap_window,
            });
        }
        Ok(None)
    }

    async fn record_locked(
        &self,
        state: &mut StreamState,
        stream_id: &str,
        sequence: u64,
    ) -> AdmissionResult<RecordOutcome> {
        if let Some(outcome) = self.check_sequence(state.cursor.as_ref(), stream_id, sequence)? {
            state.unrecorded.retain(|_, pending| *pending != sequence);
            return Ok(outcome);
        }

        // 先持久化，失败时内存状态保持不变
        self.store
            .save_checkpoint(&Checkpoint::new(stream_id, sequence))
            .await?;

        let outcome = match state.cursor.as_mut() {
            Some(cursor) => cursor.insert(sequence),
            None => {
                state.cursor = Some(Cursor::new(sequence));
                RecordOutcome::Advanced
            }
        };
        state.unrecorded.retain(|_, pending| *pending != sequence);
        if outcome == RecordOutcome::GapFilled {
            info!("流 {} 的缺口序列 {} 已补齐", stream_id, sequence);
        }
        Ok(outcome)
    }

    /// 每个流已记录的最高序列
    pub async fn stream_sequences(&self) -> HashMap<String, u64> {
        let streams = self.streams.read().await;
        let mut sequences = HashMap::with_capacity(streams.len());
        for (stream_id, stream) in streams.iter() {
            if let Some(cursor) = &stream.lock().await.cursor {
                sequences.insert(stream_id.clone(), cursor.highest);
            }
        }
        sequences
    }

    /// 重启后应从该序列继续处理
    pub async fn resume_position(&self, stream_id: &str) -> Option<u64> {
        let stream = self.existing_stream(stream_id).await?;
        let state = stream.lock().await;
        state.cursor.as_ref().map(Cursor::resume_position)
    }

    /// 已应用但检查点尚未写入的事件数
    pub async fn unrecorded_count(&self, stream_id: &str) -> usize {
        match self.existing_stream(stream_id).await {
            Some(stream) => stream.lock().await.unrecorded.len(),
            None => 0,
        }
    }

    /// 持久化检查点与最高观察序列之间缺失的序列
    pub async fn detect_gaps(&self, stream_id: &str) -> Vec<u64> {
        match self.existing_stream(stream_id).await {
            Some(stream) => stream
                .lock()
                .await
                .cursor
                .as_ref()
                .map(Cursor::gaps)
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// 从存储恢复所有流的检查点，替换当前内存状态
    pub async fn restore(&self) -> AdmissionResult<usize> {
        let checkpoints = self.store.load_checkpoints().await?;
        let mut by_stream: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for checkpoint in checkpoints {
            by_stream
                .entry(checkpoint.stream_id)
                .or_default()
                .push(checkpoint.sequence);
        }

        let mut restored = HashMap::with_capacity(by_stream.len());
        for (stream_id, mut sequences) in by_stream {
            sequences.sort_unstable();
            let mut iter = sequences.into_iter();
            let Some(first) = iter.next() else { continue };
            let mut cursor = Cursor::new(first);
            for sequence in iter {
                if !cursor.contains(sequence) {
                    cursor.insert(sequence);
                }
            }
            debug!(
                "恢复流 {}: 检查点 {}, 最高 {}",
                stream_id, cursor.watermark, cursor.highest
            );
            restored.insert(
                stream_id,
                Arc::new(Mutex::new(StreamState {
                    cursor: Some(cursor),
                    unrecorded: HashMap::new(),
                })),
            );
        }

        let count = restored.len();
        *self.streams.write().await = restored;
        info!("从检查点存储恢复了 {} 个流", count);
        Ok(count)
    }

    /// 不可取消的重放
    pub async fn replay(&self, events: Vec<ReplayEvent>) -> AdmissionResult<ReplayReport> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.replay_with_cancel(events, cancel_rx).await
    }

    /// 重放一批事件
    ///
    /// 事件按 `(stream_id, sequence)` 排序并按幂等键去重后升序应用，
    /// 与投递顺序无关。某个流遇到错误时停止该流并记入报告，其他流继续。
    /// 取消在事件之间生效，已记录的检查点保持有效。
    pub async fn replay_with_cancel(
        &self,
        events: Vec<ReplayEvent>,
        cancel: watch::Receiver<bool>,
    ) -> AdmissionResult<ReplayReport> {
        let started = Instant::now();
        let total = events.len();
        let ordered = order_events(events);
        let mut report = ReplayReport {
            duplicates: total - ordered.len(),
            ..Default::default()
        };
        let mut halted_streams: HashSet<String> = HashSet::new();

        info!("开始重放 {} 个事件 (去重后 {})", total, ordered.len());

        for (index, event) in ordered.into_iter().enumerate() {
            if *cancel.borrow() {
                warn!("重放在第 {} 个事件前被取消", index);
                report.cancelled = true;
                break;
            }
            if index > 0 && index % self.config.batch_size.max(1) == 0 {
                tokio::task::yield_now().await;
            }
            if halted_streams.contains(&event.stream_id) {
                continue;
            }

            match self.replay_event(&event).await {
                Ok(true) => report.applied += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    if e.is_fatal() {
                        error!("流 {} 在序列 {} 处停止重放: {}", event.stream_id, event.sequence, e);
                    } else {
                        warn!("流 {} 在序列 {} 处停止重放: {}", event.stream_id, event.sequence, e);
                    }
                    counter!("replay_streams_halted_total").increment(1);
                    halted_streams.insert(event.stream_id.clone());
                    report.halted.push(HaltedStream {
                        stream_id: event.stream_id.clone(),
                        sequence: event.sequence,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        counter!("replay_events_applied_total").increment(report.applied as u64);
        counter!("replay_duplicates_total").increment(report.duplicates as u64);
        info!(
            "重放完成: 应用 {}, 重复 {}, 停止的流 {}, 取消 {}",
            report.applied,
            report.duplicates,
            report.halted.len(),
            report.cancelled
        );
        Ok(report)
    }

    /// 应用并记录单个事件，返回是否实际应用
    async fn replay_event(&self, event: &ReplayEvent) -> AdmissionResult<bool> {
        let stream = self.stream(&event.stream_id).await;
        let mut state = stream.lock().await;

        let duplicate = self
            .check_sequence(state.cursor.as_ref(), &event.stream_id, event.sequence)?
            .is_some();
        if duplicate {
            state.unrecorded.retain(|_, pending| *pending != event.sequence);
            debug!(
                "跳过重复事件 {} (流 {}, 序列 {})",
                event.id, event.stream_id, event.sequence
            );
            return Ok(false);
        }
        if state.unrecorded.contains_key(&event.idempotency_key) {
            // 已应用但检查点未写入，只补写检查点
            self.record_locked(&mut state, &event.stream_id, event.sequence)
                .await?;
            return Ok(false);
        }

        self.applier.apply(event).await?;
        state
            .unrecorded
            .insert(event.idempotency_key.clone(), event.sequence);
        self.record_locked(&mut state, &event.stream_id, event.sequence)
            .await?;
        Ok(true)
    }

    /// 在后台运行重放，返回显式句柄
    pub fn spawn_replay(self: &Arc<Self>, events: Vec<ReplayEvent>) -> ReplayHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let join = tokio::spawn(async move {
            coordinator.replay_with_cancel(events, cancel_rx).await
        });
        ReplayHandle {
            cancel_tx,
            join: Some(join),
        }
    }
}

/// 按幂等键去重并排序
///
/// 同一幂等键保留 `(sequence, id)` 最小的事件，结果按
/// `(stream_id, sequence, idempotency_key, id)` 升序排列，与投递顺序无关。
fn order_events(mut events: Vec<ReplayEvent>) -> Vec<ReplayEvent> {
    events.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.stream_id.cmp(&b.stream_id))
            .then_with(|| a.payload.to_string().cmp(&b.payload.to_string()))
    });
    let mut seen = HashSet::new();
    events.retain(|event| seen.insert(event.idempotency_key.clone()));

    events.sort_by(|a, b| {
        a.stream_id
            .cmp(&b.stream_id)
            .then_with(|| a.sequence.cmp(&b.sequence))
            .then_with(|| a.idempotency_key.cmp(&b.idempotency_key))
            .then_with(|| a.id.cmp(&b.id))
    });
    events
}

/// 后台重放句柄
///
/// 必须调用 `join` 取得结果；未完成时被丢弃会触发取消。
pub struct ReplayHandle {
    cancel_tx: watch::Sender<bool>,
    join: Option<JoinHandle<AdmissionResult<ReplayReport>>>,
}

impl ReplayHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    pub async fn join(mut self) -> AdmissionResult<ReplayReport> {
        match self.join.take() {
            Some(join) => join
                .await
                .map_err(|e| AdmissionError::Internal(format!("重放任务异常退出: {e}")))?,
            None => Err(AdmissionError::Internal("重放任务已被回收".to_string())),
        }
    }

    pub async fn cancel_and_join(self) -> AdmissionResult<ReplayReport> {
        self.cancel();
        self.join().await
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        if let Some(join) = &self.join {
            if !join.is_finished() {
                warn!("重放句柄在任务完成前被丢弃，发送取消信号");
                let _ = self.cancel_tx.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stream: &str, sequence: u64, key: &str) -> ReplayEvent {
        ReplayEvent {
            id: format!("{stream}-{sequence}"),
            stream_id: stream.to_string(),
            idempotency_key: key.to_string(),
            sequence,
            payload: serde_json::json!({ "seq": sequence }),
        }
    }

    #[test]
    fn test_cursor_tracks_watermark_and_gaps() {
        let mut cursor = Cursor::new(1);
        assert_eq!(cursor.insert(2), RecordOutcome::Advanced);
        assert_eq!(cursor.insert(4), RecordOutcome::Advanced);
        assert_eq!(cursor.watermark, 2);
        assert_eq!(cursor.gaps(), vec![3]);

        assert_eq!(cursor.insert(3), RecordOutcome::GapFilled);
        assert_eq!(cursor.watermark, 4);
        assert!(cursor.pending.is_empty());
        assert!(cursor.gaps().is_empty());
        assert!(cursor.contains(1));
        assert!(!cursor.contains(5));
    }

    #[test]
    fn test_cursor_at_end_of_sequence_space() {
        let mut cursor = Cursor::new(u64::MAX - 1);
        assert_eq!(cursor.insert(u64::MAX), RecordOutcome::Advanced);
        assert_eq!(cursor.watermark, u64::MAX);
        assert!(cursor.pending.is_empty());
        assert!(cursor.gaps().is_empty());
        assert_eq!(cursor.resume_position(), u64::MAX);
        assert!(cursor.contains(u64::MAX));
    }

    #[test]
    fn test_order_events_is_delivery_order_independent() {
        let a = vec![event("k", 2, "e2"), event("k", 1, "e1"), event("j", 5, "e5")];
        let b = vec![event("j", 5, "e5"), event("k", 1, "e1"), event("k", 2, "e2")];
        assert_eq!(order_events(a), order_events(b));
    }

    #[test]
    fn test_order_events_dedupes_by_key() {
        let events = vec![event("k", 3, "same"), event("k", 1, "same"), event("k", 2, "other")];
        let ordered = order_events(events);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].sequence, 1);
        assert_eq!(ordered[1].idempotency_key, "other");
    }

    #[test]
    fn test_order_events_keeps_lowest_sequence_across_streams() {
        let ordered = order_events(vec![event("a", 5, "shared"), event("z", 1, "shared")]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].stream_id, "z");
    }
}
