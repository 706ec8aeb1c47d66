//! Threshold key generation and key switching among n parties sharing an
//! additive secret s = Σ s_i.
//!
//! Every protocol is a sequence of rounds. In each round a party turns its
//! secret shard (and the aggregate of the previous round) into a share; the
//! shares of one round combine by ring addition, in any order. Delivering
//! shares between parties is left to the caller.

pub mod ckg;
pub mod cks;
pub mod pcks;
pub mod rkg;
pub mod rtg;

pub use ckg::{CkgProtocol, CkgShare};
pub use cks::{CksProtocol, CksShare};
pub use pcks::{PcksProtocol, PcksShare};
pub use rkg::{
    RkgEphemeralSecret, RkgNaiveProtocol, RkgNaiveShare, RkgProtocol, RkgShareOne, RkgShareThree, RkgShareTwo,
};
pub use rtg::{RtgProtocol, RtgShare};

use crate::error::{HeError, Result};

/// Width of the flooding noise added to decryption and key-switch shares.
pub const DEFAULT_SMUDGING_SIGMA: f64 = (1u64 << 20) as f64;

/// A protocol share that combines with the other parties' shares of the
/// same round.
pub trait Aggregate: Sized + Clone {
    /// self += other
    fn aggregate(&mut self, other: &Self) -> Result<()>;

    /// Sum of all shares of one round.
    fn aggregate_all<'a, I>(shares: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        let mut iter = shares.into_iter();
        let mut acc = iter
            .next()
            .cloned()
            .ok_or_else(|| HeError::DimensionMismatch { expected: 1, got: 0 })?;
        for share in iter {
            acc.aggregate(share)?;
        }
        Ok(acc)
    }
}

fn check_len<T>(expected: usize, got: &[T]) -> Result<()> {
    if got.len() != expected {
        return Err(HeError::DimensionMismatch {
            expected,
            got: got.len(),
        });
    }
    Ok(())
}
