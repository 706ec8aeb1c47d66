use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::params::CkksParams;
use crate::ring::rns::{QpPoly, RnsPoly};
use crate::sampling::uniform::sample_uniform_rns;

/// Deterministic generator of common reference polynomials.
///
/// Every party seeding it with the same 32 bytes reads the same sequence of
/// uniform polynomials, so the public `a` of a protocol never has to be sent.
#[derive(Clone, Debug)]
pub struct CrpGenerator {
    rng: ChaCha20Rng,
}

impl CrpGenerator {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            rng: ChaCha20Rng::from_seed(seed),
        }
    }

    pub fn from_u64(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Uniform polynomial over Q_level.
    pub fn read_q(&mut self, params: &CkksParams, level: usize) -> RnsPoly {
        sample_uniform_rns(&params.ring_q, level + 1, &mut self.rng)
    }

    /// Uniform polynomial over Q_L ∪ P.
    pub fn read_qp(&mut self, params: &CkksParams) -> QpPoly {
        let q = sample_uniform_rns(&params.ring_q, params.max_level() + 1, &mut self.rng);
        let p = sample_uniform_rns(&params.ring_p, params.alpha(), &mut self.rng);
        QpPoly { q, p }
    }

    /// One uniform Q·P polynomial per decomposition digit.
    pub fn read_gadget_vector(&mut self, params: &CkksParams) -> Vec<QpPoly> {
        (0..params.beta()).map(|_| self.read_qp(params)).collect()
    }
}
