//! Bounded regenerate-and-validate loop with configurable backoff.

use std::time::Duration;

use async_trait::async_trait;

use cvflow_types::{EngineConfig, Result};

/// Backoff policy controlling the delay between regenerations.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Fixed delay between regenerations.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::None
    }
}

/// Ceiling and pacing for [`refine_until_valid`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationPolicy {
    /// Regenerations allowed after the first generation.
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
}

impl RegenerationPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            backoff: BackoffPolicy::None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let backoff = match (config.regeneration_backoff_ms, config.regeneration_backoff_max_ms) {
            (0, _) => BackoffPolicy::None,
            (ms, None) => BackoffPolicy::Fixed(Duration::from_millis(ms)),
            (ms, Some(max)) => BackoffPolicy::Exponential {
                base: Duration::from_millis(ms),
                max: Duration::from_millis(max),
            },
        };
        Self {
            max_retries: config.max_question_retries,
            backoff,
        }
    }
}

impl Default for RegenerationPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

/// A generator paired with the validator that grades its output.
#[async_trait]
pub trait Refine: Send + Sync {
    type Output: Send + Sync;
    type Flag: Send + Sync;

    /// Produce a candidate. `previous` carries the last candidate and its flags
    /// on every call after the first.
    async fn generate(
        &self,
        previous: Option<(&Self::Output, &[Self::Flag])>,
    ) -> Result<Self::Output>;

    /// Return the flags raised against `output`; empty means accepted.
    async fn validate(&self, output: &Self::Output) -> Result<Vec<Self::Flag>>;
}

/// Result of a refinement loop.
#[derive(Debug, Clone)]
pub struct Refined<T, F> {
    /// The last generated candidate, accepted or not.
    pub value: T,
    pub generations: usize,
    /// Flags still raised against `value`.
    pub remaining_flags: Vec<F>,
    /// The ceiling was reached with flags outstanding.
    pub exhausted: bool,
}

/// Generate, validate, and regenerate until nothing is flagged or the policy's
/// ceiling is reached.
///
/// Every generated candidate is validated, and at most `max_retries + 1`
/// generations happen. Hitting the ceiling is not an error: the last candidate
/// comes back with its outstanding flags. Collaborator errors abort the loop.
pub async fn refine_until_valid<R: Refine>(
    refiner: &R,
    policy: &RegenerationPolicy,
    label: &str,
) -> Result<Refined<R::Output, R::Flag>> {
    let mut value = refiner.generate(None).await?;
    let mut generations = 1;
    let mut flags = refiner.validate(&value).await?;

    while !flags.is_empty() && generations <= policy.max_retries {
        let delay = policy.backoff.delay_for_attempt(generations - 1);
        tracing::info!(
            step = %label,
            generation = generations + 1,
            flagged = flags.len(),
            delay_ms = %delay.as_millis(),
            "Regenerating"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        value = refiner
            .generate(Some((&value, flags.as_slice())))
            .await?;
        generations += 1;
        flags = refiner.validate(&value).await?;
    }

    let exhausted = !flags.is_empty();
    if exhausted {
        tracing::warn!(
            step = %label,
            generations,
            flagged = flags.len(),
            "Regeneration ceiling reached, keeping last candidate"
        );
    }
    Ok(Refined {
        value,
        generations,
        remaining_flags: flags,
        exhausted,
    })
}
