use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::instrument;

use crate::ckks::keys::{add_gadget_term, gaussian_qp, gen_secret_key_with_rng, uniform_qp, SecretKey};
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::rns::QpPoly;
use crate::sampling::CrpGenerator;

/// Identifier of a participant.
pub type PeerId = u64;

/// Common reference string: one uniform Q·P polynomial per digit, read from
/// a seed every participant knows.
#[derive(Clone, Debug, PartialEq)]
pub struct Crs {
    pub a: Vec<QpPoly>,
}

impl Crs {
    pub fn new(params: &CkksParams, generator: &mut CrpGenerator) -> Self {
        Self {
            a: generator.read_gadget_vector(params),
        }
    }
}

/// A participant's secret s and auxiliary secret r.
#[derive(Clone, Debug)]
pub struct MkSecretKey {
    pub peer: PeerId,
    pub sk: SecretKey,
    pub r: SecretKey,
}

/// b_l = −s·a_l + e_l for every digit l; b and a in Montgomery form.
#[derive(Clone, Debug, PartialEq)]
pub struct MkPublicKey {
    pub peer: PeerId,
    pub b: Vec<QpPoly>,
    pub a: Vec<QpPoly>,
    pub params: Arc<CkksParams>,
}

/// Per-party evaluation key D = (d0, d1, d2), Montgomery form:
///
/// d0 = −s·d1 + e0 + P·G·r, d1 uniform, d2 = r·a + e2 + P·G·s.
#[derive(Clone, Debug, PartialEq)]
pub struct MkEvaluationKey {
    pub peer: PeerId,
    pub d0: Vec<QpPoly>,
    pub d1: Vec<QpPoly>,
    pub d2: Vec<QpPoly>,
    pub params: Arc<CkksParams>,
}

/// Switching key for the cross term s_i·s_j, made by party i from its own
/// secrets and party j's public key:
///
/// k0 = −s_i·k1 + r_i·b_j + e, k1 uniform, k2 = d2 of party i.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedKey {
    pub k0: Vec<QpPoly>,
    pub k1: Vec<QpPoly>,
    pub k2: Vec<QpPoly>,
}

/// The k×k matrix of shared keys for a fixed participant set.
#[derive(Clone, Debug, PartialEq)]
pub struct MkRelinearizationKey {
    pub peers: Vec<PeerId>,
    pub keys: BTreeMap<(PeerId, PeerId), SharedKey>,
}

impl MkRelinearizationKey {
    pub fn new() -> Self {
        Self {
            peers: Vec::new(),
            keys: BTreeMap::new(),
        }
    }

    /// Add the row of shared keys produced by party `i`.
    pub fn insert_row(&mut self, i: PeerId, row: Vec<(PeerId, SharedKey)>) {
        if let Err(pos) = self.peers.binary_search(&i) {
            self.peers.insert(pos, i);
        }
        for (j, key) in row {
            self.keys.insert((i, j), key);
        }
    }

    pub fn get(&self, i: PeerId, j: PeerId) -> Result<&SharedKey> {
        self.keys
            .get(&(i, j))
            .ok_or_else(|| HeError::MissingKey(format!("shared relinearization key ({i}, {j})")))
    }

    /// Whether every pair of `peers` has a shared key.
    pub fn covers(&self, peers: &[PeerId]) -> bool {
        peers
            .iter()
            .all(|&i| peers.iter().all(|&j| self.keys.contains_key(&(i, j))))
    }
}

impl Default for MkRelinearizationKey {
    fn default() -> Self {
        Self::new()
    }
}

fn mform_all(mut v: Vec<QpPoly>) -> Vec<QpPoly> {
    for p in v.iter_mut() {
        p.mform_assign();
    }
    v
}

/// Generate the secret, public and evaluation keys of one participant.
#[instrument(skip_all, fields(peer))]
pub fn gen_mk_keys_with_rng<R: rand::Rng + ?Sized>(
    params: &Arc<CkksParams>,
    peer: PeerId,
    crs: &Crs,
    rng: &mut R,
) -> Result<(MkSecretKey, MkPublicKey, MkEvaluationKey)> {
    if crs.a.len() < params.beta() {
        return Err(HeError::DimensionMismatch {
            expected: params.beta(),
            got: crs.a.len(),
        });
    }
    let sk = gen_secret_key_with_rng(params, rng)?;
    let r = gen_secret_key_with_rng(params, rng)?;
    let s = &sk.value;

    let mut b = Vec::with_capacity(params.beta());
    let mut d0 = Vec::with_capacity(params.beta());
    let mut d1 = Vec::with_capacity(params.beta());
    let mut d2 = Vec::with_capacity(params.beta());
    for (l, a) in crs.a.iter().take(params.beta()).enumerate() {
        let mut bl = gaussian_qp(params, params.sigma, rng)?;
        bl.sub_assign(&a.mul(s)?)?;
        b.push(bl);

        let u = uniform_qp(params, rng);
        let mut x0 = gaussian_qp(params, params.sigma, rng)?;
        x0.sub_assign(&u.mul(s)?)?;
        add_gadget_term(params, &mut x0, &r.value.q, l)?;
        d0.push(x0);
        d1.push(u);

        let mut x2 = gaussian_qp(params, params.sigma, rng)?;
        x2.add_assign(&a.mul(&r.value)?)?;
        add_gadget_term(params, &mut x2, &s.q, l)?;
        d2.push(x2);
    }

    let pk = MkPublicKey {
        peer,
        b: mform_all(b),
        a: mform_all(crs.a[..params.beta()].to_vec()),
        params: params.clone(),
    };
    let evk = MkEvaluationKey {
        peer,
        d0: mform_all(d0),
        d1: mform_all(d1),
        d2: mform_all(d2),
        params: params.clone(),
    };
    Ok((MkSecretKey { peer, sk, r }, pk, evk))
}

/// Party i's row of shared keys, one per public key in `pks` (its own included).
#[instrument(skip_all, fields(peer = sk.peer, count = pks.len()))]
pub fn gen_shared_row_with_rng<R: rand::Rng + ?Sized>(
    sk: &MkSecretKey,
    evk: &MkEvaluationKey,
    pks: &[MkPublicKey],
    rng: &mut R,
) -> Result<Vec<(PeerId, SharedKey)>> {
    if evk.peer != sk.peer {
        return Err(HeError::PeerMismatch(format!(
            "evaluation key of {} used with secret of {}",
            evk.peer, sk.peer
        )));
    }
    let params = &sk.sk.params;
    let mut row = Vec::with_capacity(pks.len());
    for pk in pks {
        let mut k0 = Vec::with_capacity(params.beta());
        let mut k1 = Vec::with_capacity(params.beta());
        for bl in &pk.b {
            let u = uniform_qp(params, rng);
            let mut x0 = gaussian_qp(params, params.sigma, rng)?;
            x0.sub_assign(&u.mul(&sk.sk.value)?)?;
            // r_i·b_j with b_j in Montgomery form
            x0.mul_montgomery_add_assign(&sk.r.value, bl)?;
            k0.push(x0);
            k1.push(u);
        }
        row.push((
            pk.peer,
            SharedKey {
                k0: mform_all(k0),
                k1: mform_all(k1),
                k2: evk.d2.clone(),
            },
        ));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::presets::multiparty_test;
    use crate::ring::rns::RnsPoly;
    use crate::ring::modular::center;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn strip_montgomery(params: &CkksParams, x: &QpPoly) -> RnsPoly {
        let mut one = vec![0i64; params.ring_degree];
        one[0] = 1;
        let one = params.ring_q.poly_from_signed(&one, params.max_level() + 1).unwrap();
        let mut out = params.ring_q.zero(params.max_level() + 1);
        out.mul_montgomery_add_assign(&one, &x.q).unwrap();
        out
    }

    fn max_centered(params: &CkksParams, x: &RnsPoly) -> i64 {
        let q = params.q_moduli()[0];
        x.components[0].to_coeffs().iter().map(|&c| center(c, q).abs()).max().unwrap()
    }

    #[test]
    fn test_public_key_relation() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(61);
        let crs = Crs::new(&params, &mut CrpGenerator::from_u64(1));
        let (sk, pk, _) = gen_mk_keys_with_rng(&params, 7, &crs, &mut rng).unwrap();
        assert_eq!(pk.b.len(), params.beta());
        for (b, a) in pk.b.iter().zip(&crs.a) {
            let mut e = strip_montgomery(&params, b);
            e.add_assign(&a.q.mul(&sk.sk.value.q).unwrap()).unwrap();
            assert!(max_centered(&params, &e) < 64);
        }
    }

    #[test]
    fn test_relinearization_key_matrix() {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(62);
        let crs = Crs::new(&params, &mut CrpGenerator::from_u64(2));
        let parties: Vec<_> = [3u64, 9]
            .iter()
            .map(|&id| gen_mk_keys_with_rng(&params, id, &crs, &mut rng).unwrap())
            .collect();
        let pks: Vec<_> = parties.iter().map(|(_, pk, _)| pk.clone()).collect();

        let mut rlk = MkRelinearizationKey::new();
        assert!(!rlk.covers(&[3, 9]));
        for (sk, _, evk) in &parties {
            let row = gen_shared_row_with_rng(sk, evk, &pks, &mut rng).unwrap();
            rlk.insert_row(sk.peer, row);
        }
        assert_eq!(rlk.peers, vec![3, 9]);
        assert!(rlk.covers(&[3, 9]));
        assert!(rlk.get(9, 3).is_ok());
        assert!(matches!(rlk.get(3, 4), Err(HeError::MissingKey(_))));

        let (sk0, _, _) = &parties[0];
        let (_, _, evk1) = &parties[1];
        assert!(matches!(
            gen_shared_row_with_rng(sk0, evk1, &pks, &mut rng),
            Err(HeError::PeerMismatch(_))
        ));
    }
}
