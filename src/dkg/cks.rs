use std::sync::Arc;

use tracing::instrument;

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::keys::{gaussian_q, SecretKey};
use crate::ckks::plaintext::Plaintext;
use crate::dkg::Aggregate;
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Collective key switching from Σ s_in_i to Σ s_out_i, one round.
///
/// Party i publishes (s_in_i − s_out_i)·c1 + e with e flooded to
/// `smudging_sigma`; the new ciphertext is (c0 + Σ shares, c1). Switching to
/// the zero key is a collective decryption.
#[derive(Clone, Debug)]
pub struct CksProtocol {
    params: Arc<CkksParams>,
    smudging_sigma: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CksShare {
    pub value: RnsPoly,
}

impl Aggregate for CksShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        self.value.add_assign(&other.value)
    }
}

fn check_linear(ct: &Ciphertext) -> Result<()> {
    if ct.degree() != 1 {
        return Err(HeError::DegreeMismatch {
            expected: 1,
            got: ct.degree(),
        });
    }
    Ok(())
}

impl CksProtocol {
    pub fn new(params: &Arc<CkksParams>, smudging_sigma: f64) -> Result<Self> {
        if !(smudging_sigma.is_finite() && smudging_sigma > 0.0) {
            return Err(HeError::ParameterInvalid(format!("smudging sigma {smudging_sigma}")));
        }
        Ok(Self {
            params: params.clone(),
            smudging_sigma,
        })
    }

    /// Share for switching to `sk_out`, or to the zero key when `None`.
    #[instrument(skip_all, fields(level = ct.level()))]
    pub fn gen_share_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk_in: &SecretKey,
        sk_out: Option<&SecretKey>,
        ct: &Ciphertext,
        rng: &mut R,
    ) -> Result<CksShare> {
        check_linear(ct)?;
        let level = ct.level();
        let count = level + 1;
        let mut delta = sk_in.value.q.prefix(count);
        if let Some(out) = sk_out {
            delta.sub_assign(&out.value.q.prefix(count))?;
        }
        let mut value = gaussian_q(&self.params, self.smudging_sigma, level, rng)?;
        value.add_assign(&ct.value[1].mul(&delta)?)?;
        Ok(CksShare { value })
    }

    /// Share of a collective decryption of `ct`.
    pub fn gen_decryption_share_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        ct: &Ciphertext,
        rng: &mut R,
    ) -> Result<CksShare> {
        self.gen_share_with_rng(sk, None, ct, rng)
    }

    /// (c0 + Σ shares, c1).
    pub fn key_switch(&self, ct: &Ciphertext, agg: &CksShare) -> Result<Ciphertext> {
        check_linear(ct)?;
        let mut out = ct.clone();
        out.value[0].add_assign(&agg.value)?;
        Ok(out)
    }

    /// c0 + Σ shares, where the shares came from [`Self::gen_decryption_share_with_rng`].
    pub fn decrypt(&self, ct: &Ciphertext, agg: &CksShare) -> Result<Plaintext> {
        check_linear(ct)?;
        Ok(Plaintext {
            value: ct.value[0].add(&agg.value)?,
            scale: ct.scale,
            params: ct.params.clone(),
        })
    }
}
