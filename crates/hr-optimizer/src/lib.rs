//! Configuration search for Heurace: uniform sampling and iterated racing.

pub mod race;
pub mod sampler;
pub mod stats;
pub mod tuner;

pub use hr_types::CancellationToken;
pub use race::{
    Observation, Race, RaceOutcome, RacingConfig, RankedCandidate,
    RoundEvaluator, RoundOutcome, RoundSummary, StopReason,
};
pub use sampler::{SamplerConfig, UniformSampler};
pub use stats::{block_ranks, chi_squared_quantile, inverse_normal_cdf, FriedmanOutcome, FriedmanTest};
pub use tuner::{TunerConfig, Tuner, TuningId, TuningOutcome, TuningState, TuningStatus, TuningStrategy};
