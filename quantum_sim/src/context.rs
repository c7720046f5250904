//! Simulation context implementing QuantumContext for deterministic testing.

use async_trait::async_trait;
use quantum_env::QuantumContext;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Golden-ratio multiplier used to split one seed into independent streams.
const STREAM_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `QuantumContext` using:
/// - A virtual clock that only moves when the world advances it
/// - A seeded ChaCha8 RNG for interaction outcomes and prophecy picks
/// - Simulated sleep that advances virtual time
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for game-policy draws
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Context on the same clock with its own random stream.
    ///
    /// Each simulated player gets one, so a player's draws do not depend on
    /// how many draws other players made.
    pub fn fork(&self, stream: u64) -> Self {
        let stream_seed = self.seed ^ stream.wrapping_add(1).wrapping_mul(STREAM_MIX);
        Self {
            seed: stream_seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(stream_seed))),
            epoch: self.epoch,
        }
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *lock(&self.virtual_time_ns) += duration.as_nanos() as u64;
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        *lock(&self.virtual_time_ns) = time_ns;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Virtual milliseconds since simulation start.
    pub fn elapsed_ms(&self) -> u64 {
        self.time_ns() / 1_000_000
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl QuantumContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping is the only way simulated time passes for a task
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning simulated task");
        tokio::spawn(future);
    }

    fn random_unit(&self) -> f64 {
        lock(&self.rng).gen::<f64>()
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
