use std::{fmt, sync::Arc};

use rand::Rng as _;

/// A source of uniformly distributed values in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    /// Draws the next value.
    fn next_f64(&self) -> f64;
}

/// Draws from the thread-local generator of [`rand`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Always returns the same value.
///
/// Mostly useful in tests: `FixedRandom(0.0)` emits every sampled call, and `FixedRandom(1.0)` skips all of them.
#[derive(Clone, Copy, Debug)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

/// Outcome of sampling a single call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Decision {
    /// Emit the call, attaching the rate if one took part in sampling.
    Emit(Option<f64>),

    /// Drop the call.
    Drop,
}

/// Decides whether sampled calls are emitted.
#[derive(Clone)]
pub(crate) struct Sampler {
    source: Arc<dyn RandomSource>,
}

impl Sampler {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        Self { source }
    }

    /// Samples a call made at the given rate.
    ///
    /// Only rates strictly between zero and one take part in sampling. Anything else emits the call without a rate.
    pub fn sample(&self, rate: f64) -> Decision {
        if !is_sampled_rate(rate) {
            return Decision::Emit(None);
        }

        if self.source.next_f64() < rate {
            Decision::Emit(Some(rate))
        } else {
            Decision::Drop
        }
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

fn is_sampled_rate(rate: f64) -> bool {
    rate > 0.0 && rate < 1.0
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{Decision, FixedRandom, RandomSource, Sampler, ThreadRandom};

    struct CountingRandom {
        draws: AtomicUsize,
        value: f64,
    }

    impl RandomSource for CountingRandom {
        fn next_f64(&self) -> f64 {
            self.draws.fetch_add(1, Ordering::Relaxed);
            self.value
        }
    }

    #[test]
    fn unsampled_rates_always_emit_without_suffix() {
        let sampler = Sampler::new(Arc::new(FixedRandom(0.99)));
        assert_eq!(sampler.sample(1.0), Decision::Emit(None));
        assert_eq!(sampler.sample(2.0), Decision::Emit(None));
        assert_eq!(sampler.sample(0.0), Decision::Emit(None));
        assert_eq!(sampler.sample(f64::NAN), Decision::Emit(None));
    }

    #[test]
    fn sampled_rate_compares_against_draw() {
        let emit = Sampler::new(Arc::new(FixedRandom(0.42)));
        assert_eq!(emit.sample(0.5), Decision::Emit(Some(0.5)));
        assert_eq!(emit.sample(0.42), Decision::Drop);
        assert_eq!(emit.sample(0.1), Decision::Drop);
    }

    #[test]
    fn draws_once_per_sampled_call() {
        let source = Arc::new(CountingRandom { draws: AtomicUsize::new(0), value: 0.0 });
        let sampler = Sampler::new(source.clone());
        let _ = sampler.sample(1.0);
        assert_eq!(source.draws.load(Ordering::Relaxed), 0);
        let _ = sampler.sample(0.5);
        let _ = sampler.sample(0.5);
        assert_eq!(source.draws.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn thread_random_in_unit_interval() {
        let source = ThreadRandom;
        for _ in 0..1000 {
            let value = source.next_f64();
            assert!((0.0..1.0).contains(&value));
        }
    }
}
