use std::sync::Arc;

use tracing::instrument;

use crate::ckks::keys::{add_gadget_term, gaussian_qp, RotationKey, SecretKey, SwitchingKey};
use crate::dkg::{check_len, Aggregate};
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::galois::ntt_permutation;
use crate::ring::rns::QpPoly;

/// Collective rotation-key generation for one Galois element, one round.
///
/// Party i publishes −a_l·s_i + P·G_l·φ_g(s_i) + e for every digit l; with
/// a_l as the second half, the sum is a switching key from φ_g(s) to s.
#[derive(Clone, Debug)]
pub struct RtgProtocol {
    params: Arc<CkksParams>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RtgShare {
    pub galois: usize,
    pub value: Vec<QpPoly>,
}

impl Aggregate for RtgShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        if self.galois != other.galois {
            return Err(HeError::ParameterInvalid(format!(
                "cannot aggregate shares for galois elements {} and {}",
                self.galois, other.galois
            )));
        }
        check_len(self.value.len(), &other.value)?;
        for (a, b) in self.value.iter_mut().zip(&other.value) {
            a.add_assign(b)?;
        }
        Ok(())
    }
}

impl RtgProtocol {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        Self { params: params.clone() }
    }

    #[instrument(skip_all, fields(galois))]
    pub fn gen_share_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        galois: usize,
        crp: &[QpPoly],
        rng: &mut R,
    ) -> Result<RtgShare> {
        let params = &self.params;
        let n = params.ring_degree;
        if galois % 2 == 0 || galois >= 2 * n {
            return Err(HeError::ParameterInvalid(format!("{galois} is not a Galois element mod {}", 2 * n)));
        }
        check_len(params.beta(), crp)?;
        let s_rot = sk.value.q.permute(&ntt_permutation(&params.ring_q.order, galois));
        let mut value = Vec::with_capacity(crp.len());
        for (l, a) in crp.iter().enumerate() {
            let mut h = gaussian_qp(params, params.sigma, rng)?;
            h.sub_assign(&a.mul(&sk.value)?)?;
            add_gadget_term(params, &mut h, &s_rot, l)?;
            value.push(h);
        }
        Ok(RtgShare { galois, value })
    }

    pub fn gen_rotation_key(&self, agg: &RtgShare, crp: &[QpPoly]) -> Result<RotationKey> {
        check_len(agg.value.len(), crp)?;
        let value = agg
            .value
            .iter()
            .zip(crp)
            .map(|(h, a)| {
                let mut k0 = h.clone();
                let mut k1 = a.clone();
                k0.mform_assign();
                k1.mform_assign();
                [k0, k1]
            })
            .collect();
        let key = SwitchingKey {
            value,
            params: self.params.clone(),
        };
        Ok(RotationKey::new(key, agg.galois))
    }
}
