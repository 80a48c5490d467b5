use crate::policy::SizingStrategy;
use crate::predictor::Forecast;
use crate::resources::{ContainerResources, round_up_mib};
use crate::usage::ContainerUsage;

/* ============================= TYPES ============================= */

/// Concrete resources proposed for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedResources {
    pub cpu_request_milli: u64,
    pub cpu_limit_milli: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
}

impl ProposedResources {
    /// True when the proposal is byte-identical to what the container
    /// already has.
    pub fn matches_current(&self, current: &ContainerResources) -> bool {
        current.cpu_request_milli == Some(self.cpu_request_milli)
            && current.cpu_limit_milli == Some(self.cpu_limit_milli)
            && current.memory_request_bytes == Some(self.memory_request_bytes)
            && current.memory_limit_bytes == Some(self.memory_limit_bytes)
    }
}

/// Outcome of the sizing math for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    /// Nothing would change; the executor skips the pod without an API
    /// call or a log line.
    NoOp,
    Resize(ProposedResources),
}

/// Forecast inputs for one container, already gated on the prediction
/// feature flag.
#[derive(Debug, Clone, Default)]
pub struct PredictionInput {
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub cpu: Option<Forecast>,
    pub memory: Option<Forecast>,
}

/* ============================= CALCULATION ============================= */

/// Combine observed usage, forecasts, and the effective strategy into a
/// concrete proposal. Deterministic; all clamping happens here so the
/// common case arrives at the validator already well-formed.
pub fn propose(
    current: &ContainerResources,
    usage: ContainerUsage,
    strategy: &SizingStrategy,
    prediction: &PredictionInput,
) -> Proposal {
    let (cpu_request, cpu_limit) = size_resource(
        usage.cpu_milli as f64,
        strategy.cpu_request_multiplier,
        strategy.cpu_limit_multiplier,
        strategy.min_cpu_request_milli,
        strategy.max_cpu_limit_milli,
        strategy.fixed_cpu_request_milli,
        strategy.fixed_cpu_limit_milli,
        forecast_value(prediction, prediction.cpu.as_ref()),
        |v| v.round() as u64,
    );

    let (memory_request, memory_limit) = size_resource(
        usage.memory_bytes as f64,
        strategy.memory_request_multiplier,
        strategy.memory_limit_multiplier,
        strategy.min_memory_request_bytes,
        strategy.max_memory_limit_bytes,
        strategy.fixed_memory_request_bytes,
        strategy.fixed_memory_limit_bytes,
        forecast_value(prediction, prediction.memory.as_ref()),
        |v| round_up_mib(v.ceil() as u64),
    );

    let proposed = ProposedResources {
        cpu_request_milli: cpu_request,
        cpu_limit_milli: cpu_limit,
        memory_request_bytes: memory_request,
        memory_limit_bytes: memory_limit,
    };

    if proposed.matches_current(current) {
        Proposal::NoOp
    } else {
        Proposal::Resize(proposed)
    }
}

/// The forecast value, but only when the prediction gate is open for it.
fn forecast_value(prediction: &PredictionInput, forecast: Option<&Forecast>) -> Option<f64> {
    if !prediction.enabled {
        return None;
    }
    forecast
        .filter(|f| f.confidence >= prediction.confidence_threshold)
        .map(|f| f.value)
}

#[allow(clippy::too_many_arguments)]
fn size_resource(
    usage: f64,
    request_multiplier: f64,
    limit_multiplier: f64,
    min_request: u64,
    max_limit: u64,
    fixed_request: Option<u64>,
    fixed_limit: Option<u64>,
    forecast: Option<f64>,
    round: impl Fn(f64) -> u64,
) -> (u64, u64) {
    // The request may never be so large that request × limit multiplier
    // would overshoot the limit ceiling.
    let request_ceiling = if limit_multiplier > 0.0 {
        max_limit as f64 / limit_multiplier
    } else {
        max_limit as f64
    };

    let mut request = match fixed_request {
        Some(fixed) => fixed as f64,
        None => usage * request_multiplier,
    };
    request = request.clamp(min_request as f64, request_ceiling.max(min_request as f64));

    let mut limit = match fixed_limit {
        Some(fixed) => fixed as f64,
        None => request * limit_multiplier,
    };
    limit = limit.min(max_limit as f64);

    // Forecasts only ever raise: a low projection never shrinks what the
    // multipliers produced.
    if let Some(predicted) = forecast
        && predicted > request
    {
        request = predicted.min(max_limit as f64);
        limit = (limit.max(request * limit_multiplier).max(request)).min(max_limit as f64);
        request = request.min(limit);
    }

    (round(request), round(limit))
}

/* ============================= TESTS ============================= */
