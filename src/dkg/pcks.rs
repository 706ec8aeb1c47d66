use std::sync::Arc;

use tracing::instrument;

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::keys::{gaussian_q, PublicKey, SecretKey};
use crate::dkg::Aggregate;
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;
use crate::sampling::sample_ternary_signed;

/// Collective re-encryption under an outside public key (b', a'), one round.
///
/// Party i publishes (u_i·b' + s_i·c1 + e0, u_i·a' + e1) with e0 flooded;
/// the result is (c0 + Σ h0, Σ h1), decryptable by the owner of b'.
#[derive(Clone, Debug)]
pub struct PcksProtocol {
    params: Arc<CkksParams>,
    smudging_sigma: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PcksShare {
    pub value: [RnsPoly; 2],
}

impl Aggregate for PcksShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        let [a0, a1] = &mut self.value;
        let [b0, b1] = &other.value;
        a0.add_assign(b0)?;
        a1.add_assign(b1)
    }
}

impl PcksProtocol {
    pub fn new(params: &Arc<CkksParams>, smudging_sigma: f64) -> Result<Self> {
        if !(smudging_sigma.is_finite() && smudging_sigma > 0.0) {
            return Err(HeError::ParameterInvalid(format!("smudging sigma {smudging_sigma}")));
        }
        Ok(Self {
            params: params.clone(),
            smudging_sigma,
        })
    }

    #[instrument(skip_all, fields(level = ct.level()))]
    pub fn gen_share_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        pk_out: &PublicKey,
        ct: &Ciphertext,
        rng: &mut R,
    ) -> Result<PcksShare> {
        if ct.degree() != 1 {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                got: ct.degree(),
            });
        }
        let params = &self.params;
        let level = ct.level();
        let count = level + 1;
        let u = params
            .ring_q
            .poly_from_signed(&sample_ternary_signed(params.ring_degree, 0.5, rng), count)?;

        let mut h0 = gaussian_q(params, self.smudging_sigma, level, rng)?;
        h0.add_assign(&pk_out.b.q.prefix(count).mul(&u)?)?;
        h0.add_assign(&ct.value[1].mul(&sk.value.q.prefix(count))?)?;

        let mut h1 = gaussian_q(params, params.sigma, level, rng)?;
        h1.add_assign(&pk_out.a.q.prefix(count).mul(&u)?)?;
        Ok(PcksShare { value: [h0, h1] })
    }

    /// (c0 + Σ h0, Σ h1).
    pub fn key_switch(&self, ct: &Ciphertext, agg: &PcksShare) -> Result<Ciphertext> {
        if ct.degree() != 1 {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                got: ct.degree(),
            });
        }
        let [h0, h1] = &agg.value;
        if h0.level() != ct.level() {
            return Err(HeError::LevelMismatch {
                expected: ct.level(),
                got: h0.level(),
            });
        }
        Ok(Ciphertext {
            value: vec![ct.value[0].add(h0)?, h1.clone()],
            scale: ct.scale,
            params: ct.params.clone(),
        })
    }
}
