//! Environment-derived configuration.
//!
//! Three variables, all optional, all falling back silently to documented
//! defaults (instrumentation never warns about its own configuration):
//!
//! | Variable           | Effect                            | Default |
//! |--------------------|-----------------------------------|---------|
//! | `RANDOM_SEED`      | Seed for the priority PRNG        | 42      |
//! | `OUT_FILE`         | Trace path, opened in append mode | stdout  |
//! | `ISOFUZZ_EPOCH_MS` | Epoch length in milliseconds      | 5       |

use std::path::PathBuf;
use std::time::Duration;

/// Seed variable name.
pub const ENV_RANDOM_SEED: &str = "RANDOM_SEED";
/// Trace-destination variable name.
pub const ENV_OUT_FILE: &str = "OUT_FILE";
/// Epoch-length variable name.
pub const ENV_EPOCH_MS: &str = "ISOFUZZ_EPOCH_MS";

/// Default PRNG seed.
pub const DEFAULT_SEED: u64 = 42;
/// Default epoch length.
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(5);

/// Runtime configuration for one [`crate::IsoFuzz`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Seed for the shared priority PRNG.
    pub seed: u64,
    /// Wall-clock window over which the scheduler batches requests.
    pub epoch: Duration,
    /// Trace destination; `None` means stdout.
    pub out_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            epoch: DEFAULT_EPOCH,
            out_file: None,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// Unparseable or out-of-range values fall back to the default for that
    /// field; the other fields are unaffected.
    #[must_use]
    pub fn from_env() -> Self {
        // Negative seeds are integers too: accept them and reinterpret the
        // bit pattern, so `RANDOM_SEED=-5` selects a specific reproducible
        // stream instead of silently becoming the default.
        let seed = std::env::var(ENV_RANDOM_SEED)
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map_or(DEFAULT_SEED, |signed| signed as u64);

        let epoch = std::env::var(ENV_EPOCH_MS)
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .map_or(DEFAULT_EPOCH, |ms| Duration::from_millis(ms as u64));

        let out_file = std::env::var(ENV_OUT_FILE)
            .ok()
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        Self {
            seed,
            epoch,
            out_file,
        }
    }
}
