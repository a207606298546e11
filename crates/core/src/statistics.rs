use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{AdmissionError, AdmissionResult};

/// Nearest-rank percentile. `p` is clamped to `[0, 100]`; `None` for empty input.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let p = p.clamp(0.0, 100.0);
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population variance
pub fn variance(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    Some(values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64)
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Trailing moving average: element `i` averages the last `window` values ending at `i`.
pub fn moving_average(values: &[f64], window: usize) -> AdmissionResult<Vec<f64>> {
    if window == 0 {
        return Err(AdmissionError::invalid_argument(
            "moving average window must be > 0",
        ));
    }
    let mut result = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        let count = (i + 1).min(window);
        result.push(sum / count as f64);
    }
    Ok(result)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Number of most recent samples retained
    pub window_size: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { window_size: 1024 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub variance: f64,
}

/// Sliding window of samples (latencies, risk scores) feeding policy and health reporting
#[derive(Debug)]
pub struct StatisticsTracker {
    window_size: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new(StatisticsConfig::default())
    }
}

impl StatisticsTracker {
    pub fn new(config: StatisticsConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            window_size,
            samples: Mutex::new(VecDeque::with_capacity(window_size)),
        }
    }

    pub async fn record(&self, sample: f64) -> AdmissionResult<()> {
        if !sample.is_finite() {
            return Err(AdmissionError::invalid_argument(format!(
                "statistics sample must be finite, got {sample}"
            )));
        }
        let mut samples = self.samples.lock().await;
        if samples.len() == self.window_size {
            samples.pop_front();
        }
        samples.push_back(sample);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.samples.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.lock().await.is_empty()
    }

    pub async fn percentile(&self, p: f64) -> Option<f64> {
        let samples = self.snapshot().await;
        percentile(&samples, p)
    }

    pub async fn summary(&self) -> StatsSummary {
        let samples = self.snapshot().await;
        if samples.is_empty() {
            return StatsSummary::default();
        }
        StatsSummary {
            count: samples.len(),
            mean: mean(&samples).unwrap_or_default(),
            p50: percentile(&samples, 50.0).unwrap_or_default(),
            p95: percentile(&samples, 95.0).unwrap_or_default(),
            p99: percentile(&samples, 99.0).unwrap_or_default(),
            variance: variance(&samples).unwrap_or_default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<f64> {
        self.samples.lock().await.iter().copied().collect()
    }

    pub async fn clear(&self) {
        self.samples.lock().await.clear();
    }
}
