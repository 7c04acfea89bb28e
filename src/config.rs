//! Recognized configuration options (spec.md section 6).
//!
//! Command-line parsing, file paths, ports, log configuration, and keystore
//! handling are out of the core's scope; this struct only carries the five
//! options the algorithm itself consults.
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Tunables the virtual voting and ordering engines consult.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Spacing of coin rounds: an election is a coin round when
    /// `age % coin_freq == 0`. Must be positive.
    pub coin_freq: u32,
    /// Number of rounds after which a non-consensus event becomes stale.
    /// Must be positive.
    pub rounds_stale: u32,
    /// Number of rounds after which a round's events are garbage
    /// collected. Must be `>= rounds_stale`.
    pub rounds_expired: u32,
    /// Minimum spacing, in nanoseconds, between the consensus timestamps
    /// of successive transactions within one event. Must be positive.
    pub min_trans_timestamp_incr_nanos: u64,
    /// Number of bytes of a judge's signature folded into round whitening.
    /// Must be positive.
    pub whitening_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coin_freq: 12,
            rounds_stale: 25,
            rounds_expired: 25,
            min_trans_timestamp_incr_nanos: 1,
            whitening_length: 32,
        }
    }
}

impl Config {
    /// Validate the invariants spec.md section 6 requires of these options.
    pub fn validate(&self) -> Result<(), Error> {
        if self.coin_freq == 0 {
            return Err(Error::Config("coin_freq must be positive".into()));
        }
        if self.rounds_stale == 0 {
            return Err(Error::Config("rounds_stale must be positive".into()));
        }
        if self.rounds_expired < self.rounds_stale {
            return Err(Error::Config(
                "rounds_expired must be >= rounds_stale".into(),
            ));
        }
        if self.min_trans_timestamp_incr_nanos == 0 {
            return Err(Error::Config(
                "min_trans_timestamp_incr_nanos must be positive".into(),
            ));
        }
        if self.whitening_length == 0 {
            return Err(Error::Config("whitening_length must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rounds_expired_below_stale_is_rejected() {
        let mut cfg = Config::default();
        cfg.rounds_expired = cfg.rounds_stale - 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_coin_freq_is_rejected() {
        let mut cfg = Config::default();
        cfg.coin_freq = 0;
        assert!(cfg.validate().is_err());
    }
}
