//! Collective relinearization-key generation.
//!
//! The three-round protocol produces a switching key from s² to s with
//! s = Σ s_i using a common reference vector a and an ephemeral u = Σ u_i:
//!
//! 1. h_i = −u_i·a + P·G·s_i + e
//! 2. (s_i·h + e, s_i·a + e)
//! 3. (u_i − s_i)·Σ(s_i·a) + e
//!
//! The naive variant encrypts P·G·s under a collective public key and lets
//! every party multiply the result by its shard, re-randomizing with fresh
//! encryptions of zero.

use std::sync::Arc;

use tracing::instrument;
use zeroize::Zeroize;

use crate::ckks::keys::{
    add_gadget_term, gaussian_qp, ternary_qp, PublicKey, RelinearizationKey, SecretKey, SwitchingKey,
};
use crate::dkg::{check_len, Aggregate};
use crate::error::Result;
use crate::params::CkksParams;
use crate::ring::rns::QpPoly;

fn add_all(dst: &mut [QpPoly], src: &[QpPoly]) -> Result<()> {
    check_len(dst.len(), src)?;
    for (d, s) in dst.iter_mut().zip(src) {
        d.add_assign(s)?;
    }
    Ok(())
}

fn add_pairs(dst: &mut [[QpPoly; 2]], src: &[[QpPoly; 2]]) -> Result<()> {
    check_len(dst.len(), src)?;
    for ([d0, d1], [s0, s1]) in dst.iter_mut().zip(src) {
        d0.add_assign(s0)?;
        d1.add_assign(s1)?;
    }
    Ok(())
}

fn into_switching_key(params: &Arc<CkksParams>, mut value: Vec<[QpPoly; 2]>) -> SwitchingKey {
    for [k0, k1] in value.iter_mut() {
        k0.mform_assign();
        k1.mform_assign();
    }
    SwitchingKey {
        value,
        params: params.clone(),
    }
}

/// Party i's ephemeral u_i, kept between rounds one and three.
pub struct RkgEphemeralSecret {
    value: QpPoly,
}

impl Drop for RkgEphemeralSecret {
    fn drop(&mut self) {
        for comp in self.value.q.components.iter_mut().chain(self.value.p.components.iter_mut()) {
            comp.evals.zeroize();
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RkgShareOne {
    pub value: Vec<QpPoly>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RkgShareTwo {
    pub value: Vec<[QpPoly; 2]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RkgShareThree {
    pub value: Vec<QpPoly>,
}

impl Aggregate for RkgShareOne {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        add_all(&mut self.value, &other.value)
    }
}

impl Aggregate for RkgShareTwo {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        add_pairs(&mut self.value, &other.value)
    }
}

impl Aggregate for RkgShareThree {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        add_all(&mut self.value, &other.value)
    }
}

#[derive(Clone, Debug)]
pub struct RkgProtocol {
    params: Arc<CkksParams>,
}

impl RkgProtocol {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        Self { params: params.clone() }
    }

    fn error<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Result<QpPoly> {
        gaussian_qp(&self.params, self.params.sigma, rng)
    }

    #[instrument(skip_all, fields(round = 1))]
    pub fn gen_share_round_one_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        crp: &[QpPoly],
        rng: &mut R,
    ) -> Result<(RkgEphemeralSecret, RkgShareOne)> {
        let params = &self.params;
        check_len(params.beta(), crp)?;
        let u = ternary_qp(params, rng)?;
        let mut value = Vec::with_capacity(crp.len());
        for (l, a) in crp.iter().enumerate() {
            let mut h = self.error(rng)?;
            h.sub_assign(&a.mul(&u)?)?;
            add_gadget_term(params, &mut h, &sk.value.q, l)?;
            value.push(h);
        }
        Ok((RkgEphemeralSecret { value: u }, RkgShareOne { value }))
    }

    #[instrument(skip_all, fields(round = 2))]
    pub fn gen_share_round_two_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        round_one: &RkgShareOne,
        crp: &[QpPoly],
        rng: &mut R,
    ) -> Result<RkgShareTwo> {
        check_len(self.params.beta(), crp)?;
        check_len(crp.len(), &round_one.value)?;
        let s = &sk.value;
        let mut value = Vec::with_capacity(crp.len());
        for (h, a) in round_one.value.iter().zip(crp) {
            let mut h0 = self.error(rng)?;
            h0.add_assign(&h.mul(s)?)?;
            let mut h1 = self.error(rng)?;
            h1.add_assign(&a.mul(s)?)?;
            value.push([h0, h1]);
        }
        Ok(RkgShareTwo { value })
    }

    #[instrument(skip_all, fields(round = 3))]
    pub fn gen_share_round_three_with_rng<R: rand::Rng + ?Sized>(
        &self,
        ephemeral: &RkgEphemeralSecret,
        sk: &SecretKey,
        round_two: &RkgShareTwo,
        rng: &mut R,
    ) -> Result<RkgShareThree> {
        check_len(self.params.beta(), &round_two.value)?;
        let mut mask = ephemeral.value.clone();
        mask.sub_assign(&sk.value)?;
        let mut value = Vec::with_capacity(round_two.value.len());
        for [_, h1] in &round_two.value {
            let mut h = self.error(rng)?;
            h.add_assign(&h1.mul(&mask)?)?;
            value.push(h);
        }
        for comp in mask.q.components.iter_mut().chain(mask.p.components.iter_mut()) {
            comp.evals.zeroize();
        }
        Ok(RkgShareThree { value })
    }

    /// (Σ round-two h0 + Σ round-three, Σ round-two h1).
    pub fn gen_relin_key(&self, round_two: &RkgShareTwo, round_three: &RkgShareThree) -> Result<RelinearizationKey> {
        check_len(round_two.value.len(), &round_three.value)?;
        let mut value = round_two.value.clone();
        for ([k0, _], h) in value.iter_mut().zip(&round_three.value) {
            k0.add_assign(h)?;
        }
        Ok(RelinearizationKey {
            key: into_switching_key(&self.params, value),
        })
    }
}

/// Share of either round of the naive protocol: one RLWE pair per digit.
#[derive(Clone, Debug, PartialEq)]
pub struct RkgNaiveShare {
    pub value: Vec<[QpPoly; 2]>,
}

impl Aggregate for RkgNaiveShare {
    fn aggregate(&mut self, other: &Self) -> Result<()> {
        add_pairs(&mut self.value, &other.value)
    }
}

/// Two-round relinearization-key generation under a collective public key.
#[derive(Clone, Debug)]
pub struct RkgNaiveProtocol {
    params: Arc<CkksParams>,
}

impl RkgNaiveProtocol {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        Self { params: params.clone() }
    }

    /// (u·b + e, u·a + e) for fresh ternary u.
    fn zero_encryption<R: rand::Rng + ?Sized>(&self, pk: &PublicKey, rng: &mut R) -> Result<[QpPoly; 2]> {
        let params = &self.params;
        let u = ternary_qp(params, rng)?;
        let mut h0 = gaussian_qp(params, params.sigma, rng)?;
        h0.add_assign(&pk.b.mul(&u)?)?;
        let mut h1 = gaussian_qp(params, params.sigma, rng)?;
        h1.add_assign(&pk.a.mul(&u)?)?;
        Ok([h0, h1])
    }

    /// Encryption of P·G_l·s_i under the collective key, for every digit l.
    #[instrument(skip_all, fields(round = 1))]
    pub fn gen_share_round_one_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        pk: &PublicKey,
        rng: &mut R,
    ) -> Result<RkgNaiveShare> {
        let mut value = Vec::with_capacity(self.params.beta());
        for l in 0..self.params.beta() {
            let [mut h0, h1] = self.zero_encryption(pk, rng)?;
            add_gadget_term(&self.params, &mut h0, &sk.value.q, l)?;
            value.push([h0, h1]);
        }
        Ok(RkgNaiveShare { value })
    }

    /// s_i times the aggregated round-one pair, plus an encryption of zero.
    #[instrument(skip_all, fields(round = 2))]
    pub fn gen_share_round_two_with_rng<R: rand::Rng + ?Sized>(
        &self,
        sk: &SecretKey,
        round_one: &RkgNaiveShare,
        pk: &PublicKey,
        rng: &mut R,
    ) -> Result<RkgNaiveShare> {
        check_len(self.params.beta(), &round_one.value)?;
        let mut value = Vec::with_capacity(round_one.value.len());
        for [a0, a1] in &round_one.value {
            let [mut h0, mut h1] = self.zero_encryption(pk, rng)?;
            h0.add_assign(&a0.mul(&sk.value)?)?;
            h1.add_assign(&a1.mul(&sk.value)?)?;
            value.push([h0, h1]);
        }
        Ok(RkgNaiveShare { value })
    }

    pub fn gen_relin_key(&self, round_two: &RkgNaiveShare) -> Result<RelinearizationKey> {
        check_len(self.params.beta(), &round_two.value)?;
        Ok(RelinearizationKey {
            key: into_switching_key(&self.params, round_two.value.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckks::encoder::Encoder;
    use crate::ckks::encrypt::{decrypt, encrypt_sk_with_rng};
    use crate::ckks::eval::{EvaluationKeySet, Evaluator};
    use crate::dkg::ckg::{CkgProtocol, CkgShare};
    use crate::dkg::testing::shards;
    use crate::params::presets::multiparty_test;
    use crate::sampling::CrpGenerator;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    /// Square a random vector with `rlk` and compare against the clear result.
    fn check_squaring(params: &Arc<CkksParams>, joint: &SecretKey, rlk: RelinearizationKey, rng: &mut ChaCha20Rng) {
        let encoder = Encoder::new(params);
        let values: Vec<f64> = (0..params.slots()).map(|_| rng.random_range(-1.0..1.0)).collect();
        let pt = encoder.encode_real(&values, params.max_level(), params.scale).unwrap();
        let mut ct = encrypt_sk_with_rng(&pt, joint, rng).unwrap();

        let eval = Evaluator::new(
            params,
            EvaluationKeySet {
                relin: Some(rlk),
                rotations: None,
            },
        )
        .unwrap();
        let rhs = ct.clone();
        eval.mul_relin(&mut ct, &rhs, true).unwrap();
        eval.rescale(&mut ct).unwrap();
        assert_eq!(ct.degree(), 1);

        let got = encoder.decode_real(&decrypt(&ct, joint).unwrap()).unwrap();
        let err = got
            .iter()
            .zip(&values)
            .map(|(g, v)| (g - v * v).abs())
            .fold(0.0, f64::max);
        assert!(err < 1e-4, "error {err}");
    }

    #[test]
    fn test_three_round_key_relinearizes() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(92);
        let (sks, joint) = shards(&params, 3, &mut rng);
        let crp = CrpGenerator::from_u64(11).read_gadget_vector(&params);
        let rkg = RkgProtocol::new(&params);

        let mut ephemerals = Vec::new();
        let mut ones = Vec::new();
        for sk in &sks {
            let (u, share) = rkg.gen_share_round_one_with_rng(sk, &crp, &mut rng).unwrap();
            ephemerals.push(u);
            ones.push(share);
        }
        let agg1 = RkgShareOne::aggregate_all(ones.iter().rev()).unwrap();

        let twos: Vec<_> = sks
            .iter()
            .map(|sk| rkg.gen_share_round_two_with_rng(sk, &agg1, &crp, &mut rng).unwrap())
            .collect();
        let agg2 = RkgShareTwo::aggregate_all(&twos).unwrap();

        let threes: Vec<_> = sks
            .iter()
            .zip(&ephemerals)
            .map(|(sk, u)| rkg.gen_share_round_three_with_rng(u, sk, &agg2, &mut rng).unwrap())
            .collect();
        let agg3 = RkgShareThree::aggregate_all(&threes).unwrap();

        let rlk = rkg.gen_relin_key(&agg2, &agg3).unwrap();
        check_squaring(&params, &joint, rlk, &mut rng);
    }

    #[test]
    fn test_naive_key_relinearizes() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(93);
        let (sks, joint) = shards(&params, 3, &mut rng);
        let mut crp_gen = CrpGenerator::from_u64(12);
        let crp = crp_gen.read_qp(&params);

        let ckg = CkgProtocol::new(&params);
        let ckg_shares: Vec<_> = sks
            .iter()
            .map(|sk| ckg.gen_share_with_rng(sk, &crp, &mut rng).unwrap())
            .collect();
        let pk = ckg.gen_public_key(&CkgShare::aggregate_all(&ckg_shares).unwrap(), &crp);

        let rkg = RkgNaiveProtocol::new(&params);
        let ones: Vec<_> = sks
            .iter()
            .map(|sk| rkg.gen_share_round_one_with_rng(sk, &pk, &mut rng).unwrap())
            .collect();
        let agg1 = RkgNaiveShare::aggregate_all(&ones).unwrap();
        let twos: Vec<_> = sks
            .iter()
            .map(|sk| rkg.gen_share_round_two_with_rng(sk, &agg1, &pk, &mut rng).unwrap())
            .collect();
        let rlk = rkg.gen_relin_key(&RkgNaiveShare::aggregate_all(&twos).unwrap()).unwrap();
        check_squaring(&params, &joint, rlk, &mut rng);
    }

    #[test]
    fn test_round_inputs_are_checked() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(94);
        let (sks, _) = shards(&params, 1, &mut rng);
        let crp = CrpGenerator::from_u64(13).read_gadget_vector(&params);
        let rkg = RkgProtocol::new(&params);
        assert!(rkg.gen_share_round_one_with_rng(&sks[0], &crp[..1], &mut rng).is_err());

        let (_, one) = rkg.gen_share_round_one_with_rng(&sks[0], &crp, &mut rng).unwrap();
        let mut short = one.clone();
        short.value.pop();
        let mut acc = one.clone();
        assert!(acc.aggregate(&short).is_err());
    }
}
