//! Relinearization of tensored multi-key ciphertexts.
//!
//! Both strategies fold every cross term c[i][j] (i, j ≥ 1) into the
//! constant term and the linear terms of parties i and j. The shared-key
//! path uses one precomputed key per pair; the on-the-fly path first
//! switches the term through party j's public key and then through party
//! i's evaluation key.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::instrument;

use crate::ckks::keyswitch::dot;
use crate::error::{HeError, Result};
use crate::multikey::ciphertext::MkCiphertext;
use crate::multikey::keys::{MkEvaluationKey, MkPublicKey, MkRelinearizationKey, PeerId, SharedKey};
use crate::params::CkksParams;
use crate::ring::rns::QpPoly;

/// Contribution of one cross term, still over Q_l ∪ P.
struct PairTerm {
    i: usize,
    j: usize,
    to_const: QpPoly,
    to_i: QpPoly,
    to_j: QpPoly,
}

fn check_tensored(ct: &MkCiphertext) -> Result<()> {
    let width = ct.num_peers() + 1;
    if ct.value.len() != width * width {
        return Err(HeError::DegreeMismatch {
            expected: 2,
            got: if ct.value.len() == width { 1 } else { 0 },
        });
    }
    Ok(())
}

fn pairs(k: usize) -> Vec<(usize, usize)> {
    (1..=k).flat_map(|i| (1..=k).map(move |j| (i, j))).collect()
}

/// Collapse the per-pair contributions onto c_0 + c[0][t] + c[t][0] and
/// bring them back to Q_l.
fn fold(params: &CkksParams, ct: &mut MkCiphertext, terms: Vec<PairTerm>) -> Result<()> {
    let width = ct.num_peers() + 1;
    let level = ct.level();
    let mut acc: Vec<QpPoly> = (0..width)
        .map(|_| QpPoly::zero(&params.ring_q, &params.ring_p, level))
        .collect();
    for t in terms {
        acc[0].add_assign(&t.to_const)?;
        acc[t.i].add_assign(&t.to_i)?;
        acc[t.j].add_assign(&t.to_j)?;
    }

    let mut out = Vec::with_capacity(width);
    out.push(ct.value[0].clone());
    for t in 1..width {
        out.push(ct.value[t].add(&ct.value[t * width])?);
    }
    for (o, a) in out.iter_mut().zip(&acc) {
        o.add_assign(&params.extender.mod_down(a)?)?;
    }
    ct.value = out;
    Ok(())
}

/// Relinearize with the precomputed k×k matrix of shared keys.
#[instrument(skip_all, fields(peers = ct.num_peers(), level = ct.level()))]
pub fn relinearize_shared(params: &CkksParams, ct: &mut MkCiphertext, rlk: &MkRelinearizationKey) -> Result<()> {
    check_tensored(ct)?;
    let k = ct.num_peers();
    let width = k + 1;
    let mut keys: Vec<(usize, usize, &SharedKey)> = Vec::with_capacity(k * k);
    for (i, j) in pairs(k) {
        keys.push((i, j, rlk.get(ct.peers[i - 1], ct.peers[j - 1])?));
    }

    let terms = keys
        .into_par_iter()
        .map(|(i, j, key)| -> Result<PairTerm> {
            let digits = params.extender.decompose(&ct.value[i * width + j])?;
            Ok(PairTerm {
                i,
                j,
                to_const: dot(params, &digits, &key.k0)?,
                to_i: dot(params, &digits, &key.k1)?,
                to_j: dot(params, &digits, &key.k2)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    fold(params, ct, terms)
}

/// Relinearize from the parties' public and evaluation keys alone.
#[instrument(skip_all, fields(peers = ct.num_peers(), level = ct.level()))]
pub fn relinearize_on_the_fly(
    params: &CkksParams,
    ct: &mut MkCiphertext,
    pks: &BTreeMap<PeerId, MkPublicKey>,
    evks: &BTreeMap<PeerId, MkEvaluationKey>,
) -> Result<()> {
    check_tensored(ct)?;
    let k = ct.num_peers();
    let width = k + 1;
    let missing = |what: &str, p: PeerId| HeError::MissingKey(format!("{what} of peer {p}"));
    let mut jobs: Vec<(usize, usize, &MkEvaluationKey, &MkPublicKey)> = Vec::with_capacity(k * k);
    for (i, j) in pairs(k) {
        let (pi, pj) = (ct.peers[i - 1], ct.peers[j - 1]);
        let evk = evks.get(&pi).ok_or_else(|| missing("evaluation key", pi))?;
        let pk = pks.get(&pj).ok_or_else(|| missing("public key", pj))?;
        jobs.push((i, j, evk, pk));
    }

    let terms = jobs
        .into_par_iter()
        .map(|(i, j, evk, pk)| -> Result<PairTerm> {
            let ext = &params.extender;
            let digits = ext.decompose(&ct.value[i * width + j])?;
            // c·b_j ≈ -c·s_j·a over Q_l
            let through_pk = ext.mod_down(&dot(params, &digits, &pk.b)?)?;
            let digits2 = ext.decompose(&through_pk)?;
            Ok(PairTerm {
                i,
                j,
                to_const: dot(params, &digits2, &evk.d0)?,
                to_i: dot(params, &digits2, &evk.d1)?,
                to_j: dot(params, &digits, &evk.d2)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    fold(params, ct, terms)
}
