use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

/* ============================= TYPES ============================= */

/// Which resource a usage series tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
        }
    }
}

/// One usage series: a container's CPU or memory over time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub resource: ResourceKind,
}

/// Forecast output: a predicted usage value with how much the model
/// trusts it. Advisory and upward-only — the calculator ignores any
/// forecast below its own baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub value: f64,
    pub confidence: f64,
    pub method: &'static str,
}

type Sample = (DateTime<Utc>, f64);

/* ============================= FORECASTER ============================= */

/// A swappable forecasting model over one series.
pub trait Forecaster: Send + Sync {
    /// Predict usage at `now + horizon`. `None` when the series is too
    /// thin to say anything.
    fn forecast(&self, samples: &[Sample], now: DateTime<Utc>, horizon: Duration)
    -> Option<Forecast>;
}

/// Recency-weighted linear regression with an optional hour-of-day
/// seasonal factor once the series spans a full day.
#[derive(Debug, Clone, Default)]
pub struct WeightedLinearForecaster {
    pub seasonal: bool,
}

const MIN_SAMPLES: usize = 3;
/// Sample count at which the count factor stops discounting confidence.
const FULL_CONFIDENCE_SAMPLES: usize = 12;

impl Forecaster for WeightedLinearForecaster {
    fn forecast(
        &self,
        samples: &[Sample],
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> Option<Forecast> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }

        let t0 = samples[0].0;
        let xs: Vec<f64> = samples
            .iter()
            .map(|(t, _)| t.signed_duration_since(t0).num_milliseconds() as f64 / 1000.0)
            .collect();
        let ys: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        // Linearly increasing weights favor the newest samples.
        let ws: Vec<f64> = (1..=samples.len()).map(|i| i as f64).collect();

        let (slope, intercept, r2) = weighted_linear_fit(&xs, &ys, &ws)?;

        let target_x = now.signed_duration_since(t0).num_milliseconds() as f64 / 1000.0
            + horizon.as_secs_f64();
        let mut value = intercept + slope * target_x;

        let mut method = "weighted-linear";
        if self.seasonal
            && let Some(factor) = seasonal_factor(
                samples,
                now + chrono::Duration::from_std(horizon).unwrap_or(chrono::Duration::zero()),
            )
        {
            value *= factor;
            method = "weighted-linear-seasonal";
        }

        if !value.is_finite() {
            return None;
        }
        value = value.max(0.0);

        let count_factor =
            (samples.len() as f64 / FULL_CONFIDENCE_SAMPLES as f64).clamp(0.0, 1.0);
        let confidence = (r2 * count_factor).clamp(0.0, 1.0);

        Some(Forecast {
            value,
            confidence,
            method,
        })
    }
}

/// Weighted least squares over (x, y); returns (slope, intercept, r²).
fn weighted_linear_fit(xs: &[f64], ys: &[f64], ws: &[f64]) -> Option<(f64, f64, f64)> {
    let w_sum: f64 = ws.iter().sum();
    if w_sum <= 0.0 {
        return None;
    }

    let mean = |vals: &[f64]| -> f64 {
        vals.iter().zip(ws).map(|(v, w)| v * w).sum::<f64>() / w_sum
    };

    let x_mean = mean(xs);
    let y_mean = mean(ys);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for ((x, y), w) in xs.iter().zip(ys).zip(ws) {
        sxx += w * (x - x_mean) * (x - x_mean);
        sxy += w * (x - x_mean) * (y - y_mean);
    }

    if sxx == 0.0 {
        // All samples at the same instant; flat prediction, full trust in
        // the mean but nothing about trend.
        return Some((0.0, y_mean, 0.0));
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for ((x, y), w) in xs.iter().zip(ys).zip(ws) {
        let fitted = intercept + slope * x;
        ss_res += w * (y - fitted) * (y - fitted);
        ss_tot += w * (y - y_mean) * (y - y_mean);
    }

    let r2 = if ss_tot == 0.0 {
        // Perfectly flat series: the fit is exact.
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some((slope, intercept, r2))
}

/// Multiplicative hour-of-day factor: mean of samples sharing the target
/// hour vs the overall mean. Needs at least a day of history.
fn seasonal_factor(samples: &[Sample], target: DateTime<Utc>) -> Option<f64> {
    let span = samples.last()?.0.signed_duration_since(samples.first()?.0);
    if span < chrono::Duration::hours(24) {
        return None;
    }

    let overall: f64 = samples.iter().map(|(_, v)| v).sum::<f64>() / samples.len() as f64;
    if overall <= 0.0 {
        return None;
    }

    let hour = target.hour();
    let in_hour: Vec<f64> = samples
        .iter()
        .filter(|(t, _)| t.hour() == hour)
        .map(|(_, v)| *v)
        .collect();
    if in_hour.is_empty() {
        return None;
    }

    let hour_mean = in_hour.iter().sum::<f64>() / in_hour.len() as f64;
    Some(hour_mean / overall)
}

/* ============================= PREDICTOR ============================= */

/// Maintains rolling usage windows per (namespace, pod, container,
/// resource) and answers forecast queries through the configured model.
pub struct Predictor<F: Forecaster = WeightedLinearForecaster> {
    window: Duration,
    max_samples: usize,
    series: HashMap<SeriesKey, VecDeque<Sample>>,
    forecaster: F,
}

impl Predictor<WeightedLinearForecaster> {
    pub fn new(window: Duration) -> Self {
        Self::with_forecaster(window, WeightedLinearForecaster::default())
    }
}

impl<F: Forecaster> Predictor<F> {
    pub fn with_forecaster(window: Duration, forecaster: F) -> Self {
        Self {
            window,
            max_samples: 720,
            series: HashMap::new(),
            forecaster,
        }
    }

    /// Record one observation and trim the window.
    pub fn observe(&mut self, key: SeriesKey, at: DateTime<Utc>, value: f64) {
        let buf = self.series.entry(key).or_default();
        buf.push_back((at, value));

        let horizon = at
            - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        while let Some((t, _)) = buf.front() {
            if *t < horizon || buf.len() > self.max_samples {
                buf.pop_front();
            } else {
                break;
            }
        }
    }

    /// Forecast usage at `now + horizon` for one series.
    pub fn forecast(
        &self,
        key: &SeriesKey,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> Option<Forecast> {
        let samples = self.series.get(key)?;
        let samples: Vec<Sample> = samples.iter().copied().collect();
        self.forecaster.forecast(&samples, now, horizon)
    }

    /// Drop all series belonging to a pod that no longer exists.
    pub fn forget_pod(&mut self, namespace: &str, pod: &str) {
        self.series
            .retain(|k, _| !(k.namespace == namespace && k.pod == pod));
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn sample_count(&self, key: &SeriesKey) -> usize {
        self.series.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

/* ============================= TESTS ============================= */
