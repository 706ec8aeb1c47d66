use std::sync::Arc;

use tracing::instrument;

use crate::ckks::keys::{gaussian_qp, PublicKey, SecretKey};
use crate::dkg::Aggregate;
use crate::error::Result;
use crate::params::CkksParams;
use crate::ring::rns::QpPoly;

/// Collective public-key generation, one round.
///
/// Party i publishes −a·s_i + e_i for a common reference polynomial a; the
/// sum is the b half of a public key under Σ s_i.
#[derive(Clone, Debug)]
pub struct CkgProtocol {
    params: Arc<CkksParams>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CkgShare {
    pub value: QpPoly,
}

impl Aggregate for CkgShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        self.value.add_assign(&other.value)
    }
}

impl CkgProtocol {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        Self { params: params.clone() }
    }

    #[instrument(skip_all)]
    pub fn gen_share_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        crp: &QpPoly,
        rng: &mut R,
    ) -> Result<CkgShare> {
        let mut value = gaussian_qp(&self.params, self.params.sigma, rng)?;
        value.sub_assign(&crp.mul(&sk.value)?)?;
        Ok(CkgShare { value })
    }

    pub fn gen_public_key(&self, agg: &CkgShare, crp: &QpPoly) -> PublicKey {
        PublicKey {
            b: agg.value.clone(),
            a: crp.clone(),
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckks::encoder::Encoder;
    use crate::ckks::encrypt::{decrypt, encrypt_pk_with_rng};
    use crate::dkg::testing::shards;
    use crate::params::presets::multiparty_test;
    use crate::sampling::CrpGenerator;
    use rand::{seq::SliceRandom, Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_public_key_in_any_arrival_order() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(91);
        let (sks, joint) = shards(&params, 4, &mut rng);
        let crp = CrpGenerator::from_u64(7).read_qp(&params);
        let ckg = CkgProtocol::new(&params);
        let shares: Vec<CkgShare> = sks
            .iter()
            .map(|sk| ckg.gen_share_with_rng(sk, &crp, &mut rng).unwrap())
            .collect();

        let agg = CkgShare::aggregate_all(&shares).unwrap();
        let mut shuffled = shares.clone();
        shuffled.shuffle(&mut rng);
        assert_eq!(CkgShare::aggregate_all(&shuffled).unwrap(), agg);

        let pk = ckg.gen_public_key(&agg, &crp);
        let encoder = Encoder::new(&params);
        let values: Vec<f64> = (0..params.slots()).map(|_| rng.random_range(-1.0..1.0)).collect();
        let pt = encoder.encode_real(&values, params.max_level(), params.scale).unwrap();
        let ct = encrypt_pk_with_rng(&pt, &pk, &mut rng).unwrap();
        let got = encoder.decode_real(&decrypt(&ct, &joint).unwrap()).unwrap();
        let err = got.iter().zip(&values).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        assert!(err < 1e-6, "error {err}");
    }

    #[test]
    fn test_aggregate_of_nothing_fails() {
        assert!(CkgShare::aggregate_all(&[]).is_err());
    }
}
