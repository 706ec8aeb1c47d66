use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::instrument;

use crate::ckks::keys::gaussian_q;
use crate::ckks::plaintext::Plaintext;
use crate::error::{HeError, Result};
use crate::multikey::ciphertext::MkCiphertext;
use crate::multikey::keys::{MkPublicKey, MkSecretKey, PeerId};
use crate::ring::rns::RnsPoly;
use crate::sampling::sample_ternary_signed;

/// Encrypt under one party's public key: (u·b_0 + e0 + m, u·a_0 + e1).
pub fn encrypt(pt: &Plaintext, pk: &MkPublicKey) -> Result<MkCiphertext> {
    let mut rng = ChaCha20Rng::from_os_rng();
    encrypt_with_rng(pt, pk, &mut rng)
}

pub fn encrypt_with_rng<R: rand::Rng + ?Sized>(pt: &Plaintext, pk: &MkPublicKey, rng: &mut R) -> Result<MkCiphertext> {
    let (Some(b), Some(a)) = (pk.b.first(), pk.a.first()) else {
        return Err(HeError::MissingKey(format!("public key of peer {} is empty", pk.peer)));
    };
    let params = &pt.params;
    let level = pt.level();
    let count = level + 1;
    let u = params
        .ring_q
        .poly_from_signed(&sample_ternary_signed(params.ring_degree, 0.5, rng), count)?;

    let mut c0 = gaussian_q(params, params.sigma, level, rng)?;
    c0.mul_montgomery_add_assign(&u, &b.q)?;
    c0.add_assign(&pt.value)?;
    let mut c1 = gaussian_q(params, params.sigma, level, rng)?;
    c1.mul_montgomery_add_assign(&u, &a.q)?;

    Ok(MkCiphertext {
        peers: vec![pk.peer],
        value: vec![c0, c1],
        scale: pt.scale,
        params: params.clone(),
    })
}

/// One party's share c_i·s_i + e of a joint decryption.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialDecryption {
    pub peer: PeerId,
    pub value: RnsPoly,
}

/// Partial decryption flooded with Gaussian noise of width `smudge_sigma`.
#[instrument(skip_all, fields(peer = sk.peer))]
pub fn partial_decrypt_with_rng<R: rand::Rng + ?Sized>(
    ct: &MkCiphertext,
    sk: &MkSecretKey,
    smudge_sigma: f64,
    rng: &mut R,
) -> Result<PartialDecryption> {
    ct.check_linear()?;
    let slot = ct.slot_of(sk.peer)?;
    let level = ct.level();
    let mut value = gaussian_q(&ct.params, smudge_sigma, level, rng)?;
    value.add_assign(&ct.value[slot].mul(&sk.sk.value.q.prefix(level + 1))?)?;
    Ok(PartialDecryption { peer: sk.peer, value })
}

/// Combine one share per participant into the plaintext c_0 + Σ shares.
pub fn merge(ct: &MkCiphertext, shares: &[PartialDecryption]) -> Result<Plaintext> {
    ct.check_linear()?;
    let mut seen: Vec<PeerId> = shares.iter().map(|s| s.peer).collect();
    seen.sort_unstable();
    if seen != ct.peers {
        return Err(HeError::PeerMismatch(format!(
            "shares from {seen:?} do not match participants {:?}",
            ct.peers
        )));
    }
    let mut value = ct.value[0].clone();
    for share in shares {
        value.add_assign(&share.value)?;
    }
    Ok(Plaintext {
        value,
        scale: ct.scale,
        params: ct.params.clone(),
    })
}

/// Decrypt with every participant's secret at hand, linear or tensored.
pub fn decrypt(ct: &MkCiphertext, sks: &[&MkSecretKey]) -> Result<Plaintext> {
    let count = ct.level() + 1;
    let width = ct.num_peers() + 1;
    let mut secrets: Vec<Option<RnsPoly>> = vec![None];
    for &p in &ct.peers {
        let sk = sks
            .iter()
            .find(|sk| sk.peer == p)
            .ok_or_else(|| HeError::MissingKey(format!("secret key of peer {p}")))?;
        secrets.push(Some(sk.sk.value.q.prefix(count)));
    }

    let mut value = ct.params.ring_q.zero(count);
    for (idx, c) in ct.value.iter().enumerate() {
        let (i, j) = if ct.is_tensored() { (idx / width, idx % width) } else { (idx, 0) };
        let mut term = c.clone();
        for s in [&secrets[i], &secrets[j]].into_iter().flatten() {
            term.mul_assign(s)?;
        }
        value.add_assign(&term)?;
    }
    Ok(Plaintext {
        value,
        scale: ct.scale,
        params: ct.params.clone(),
    })
}
