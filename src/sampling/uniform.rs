use rand::seq::index;
use rand::Rng;

use crate::ring::ntt::NttPoly;
use crate::ring::poly::CoeffPoly;
use crate::ring::rns::{RnsBasis, RnsPoly};

/// Uniform value in [0, modulus) by rejection on the covering bit mask.
fn uniform_below<R: Rng + ?Sized>(modulus: u64, rng: &mut R) -> u64 {
    let mask = if modulus.is_power_of_two() {
        modulus - 1
    } else {
        (1u64 << (64 - modulus.leading_zeros())) - 1
    };
    loop {
        let val = rng.random::<u64>() & mask;
        if val < modulus {
            break val;
        }
    }
}

/// Polynomial with uniformly random coefficients in [0, modulus).
pub fn sample_uniform_poly<R: Rng + ?Sized>(n: usize, modulus: u64, rng: &mut R) -> CoeffPoly {
    CoeffPoly {
        coeffs: (0..n).map(|_| uniform_below(modulus, rng)).collect(),
        modulus,
    }
}

/// Uniform element of R over the first `count` moduli of `basis`.
///
/// Uniform residues are uniform in either representation, so the NTT-domain
/// values are drawn directly.
pub fn sample_uniform_rns<R: Rng + ?Sized>(basis: &RnsBasis, count: usize, rng: &mut R) -> RnsPoly {
    let components = basis.plans[..count.min(basis.num_moduli())]
        .iter()
        .map(|plan| {
            let q = plan.modulus();
            NttPoly {
                evals: (0..basis.ring_degree).map(|_| uniform_below(q, rng)).collect(),
                modulus: q,
                plan: plan.clone(),
            }
        })
        .collect();
    RnsPoly {
        components,
        ring_degree: basis.ring_degree,
    }
}

/// Ternary coefficients: ±1 each with probability `density / 2`, else 0.
pub fn sample_ternary_signed<R: Rng + ?Sized>(n: usize, density: f64, rng: &mut R) -> Vec<i64> {
    (0..n)
        .map(|_| {
            if rng.random::<f64>() >= density {
                0
            } else if rng.random::<bool>() {
                1
            } else {
                -1
            }
        })
        .collect()
}

/// Ternary coefficients with exactly `h` non-zero entries at random positions.
pub fn sample_ternary_hamming<R: Rng + ?Sized>(n: usize, h: usize, rng: &mut R) -> Vec<i64> {
    let mut out = vec![0i64; n];
    for pos in index::sample(rng, n, h.min(n)) {
        out[pos] = if rng.random::<bool>() { 1 } else { -1 };
    }
    out
}
