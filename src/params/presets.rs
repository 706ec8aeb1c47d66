//! Small parameter sets for tests, benchmarks and demos.
//!
//! None of these reach 128-bit security: the rings are far too small for the
//! size of Q·P. They exist to make the homomorphic pipeline fast to exercise.

use std::sync::Arc;

use crate::error::Result;
use crate::params::{CkksParams, CkksParamsBuilder};

/// N = 2^11, eight 40-bit levels over a 55-bit base prime, two 61-bit special
/// primes, Δ = 2^40. Deep enough for a degree-7 Goldschmidt inverse.
pub fn ckks_test() -> Result<Arc<CkksParams>> {
    CkksParamsBuilder::new()
        .log_n(11)
        .log_q(vec![55, 40, 40, 40, 40, 40, 40, 40, 40])
        .log_p(vec![61, 61])
        .log_slots(10)
        .log_scale(40)
        .build()
}

/// N = 2^10, three 40-bit levels, one special prime (alpha = 1, so every
/// Q modulus is its own digit).
pub fn ckks_tiny() -> Result<Arc<CkksParams>> {
    CkksParamsBuilder::new()
        .log_n(10)
        .log_q(vec![50, 40, 40, 40])
        .log_p(vec![60])
        .log_slots(9)
        .log_scale(40)
        .build()
}

/// Multi-party demo set: N = 2^11, four 45-bit levels over a 55-bit base,
/// two 61-bit special primes, Δ = 2^45.
pub fn multiparty_test() -> Result<Arc<CkksParams>> {
    CkksParamsBuilder::new()
        .log_n(11)
        .log_q(vec![55, 45, 45, 45, 45])
        .log_p(vec![61, 61])
        .log_slots(10)
        .log_scale(45)
        .build()
}

/// Benchmark set: N = 2^13 with a 5-level chain.
pub fn ckks_bench() -> Result<Arc<CkksParams>> {
    CkksParamsBuilder::new()
        .log_n(13)
        .log_q(vec![60, 45, 45, 45, 45, 45])
        .log_p(vec![61, 61])
        .log_slots(12)
        .log_scale(45)
        .build()
}
