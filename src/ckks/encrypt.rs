use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::keys::{gaussian_q, PublicKey, SecretKey};
use crate::ckks::plaintext::Plaintext;
use crate::error::{HeError, Result};
use crate::ring::rns::RnsPoly;
use crate::sampling::{sample_ternary_signed, sample_uniform_rns};

fn check_level(pt: &Plaintext) -> Result<usize> {
    let level = pt.level();
    if level > pt.params.max_level() {
        return Err(HeError::LevelMismatch {
            expected: pt.params.max_level(),
            got: level,
        });
    }
    Ok(level)
}

/// Public-key encryption at the plaintext's level.
///
/// ct = (u·b + e0 + m, u·a + e1) with u ternary and e0, e1 Gaussian.
pub fn encrypt_pk(pt: &Plaintext, pk: &PublicKey) -> Result<Ciphertext> {
    let mut rng = ChaCha20Rng::from_os_rng();
    encrypt_pk_with_rng(pt, pk, &mut rng)
}

pub fn encrypt_pk_with_rng<R: rand::Rng + ?Sized>(pt: &Plaintext, pk: &PublicKey, rng: &mut R) -> Result<Ciphertext> {
    let level = check_level(pt)?;
    let params = &pt.params;
    let count = level + 1;

    let u = params
        .ring_q
        .poly_from_signed(&sample_ternary_signed(params.ring_degree, 0.5, rng), count)?;

    let mut c0 = pk.b.q.prefix(count).mul(&u)?;
    c0.add_assign(&gaussian_q(params, params.sigma, level, rng)?)?;
    c0.add_assign(&pt.value)?;

    let mut c1 = pk.a.q.prefix(count).mul(&u)?;
    c1.add_assign(&gaussian_q(params, params.sigma, level, rng)?)?;

    Ok(Ciphertext {
        value: vec![c0, c1],
        scale: pt.scale,
        params: params.clone(),
    })
}

/// Secret-key encryption: ct = (-a·s + e + m, a).
pub fn encrypt_sk(pt: &Plaintext, sk: &SecretKey) -> Result<Ciphertext> {
    let mut rng = ChaCha20Rng::from_os_rng();
    encrypt_sk_with_rng(pt, sk, &mut rng)
}

pub fn encrypt_sk_with_rng<R: rand::Rng + ?Sized>(pt: &Plaintext, sk: &SecretKey, rng: &mut R) -> Result<Ciphertext> {
    let level = check_level(pt)?;
    let params = &pt.params;
    let count = level + 1;

    let a = sample_uniform_rns(&params.ring_q, count, rng);
    let mut c0 = gaussian_q(params, params.sigma, level, rng)?;
    c0.sub_assign(&a.mul(&sk.value.q.prefix(count))?)?;
    c0.add_assign(&pt.value)?;

    Ok(Ciphertext {
        value: vec![c0, a],
        scale: pt.scale,
        params: params.clone(),
    })
}

/// Σ c_i·s^i at the ciphertext's level.
pub(crate) fn phase(ct: &Ciphertext, s: &RnsPoly) -> Result<RnsPoly> {
    let count = ct.level() + 1;
    let s = s.prefix(count);
    let mut acc = ct
        .value
        .last()
        .cloned()
        .ok_or(HeError::DegreeMismatch { expected: 1, got: 0 })?;
    // Horner from the highest degree
    for c in ct.value.iter().rev().skip(1) {
        acc.mul_assign(&s)?;
        acc.add_assign(c)?;
    }
    Ok(acc)
}

/// Decrypt a ciphertext of any degree.
pub fn decrypt(ct: &Ciphertext, sk: &SecretKey) -> Result<Plaintext> {
    Ok(Plaintext {
        value: phase(ct, &sk.value.q)?,
        scale: ct.scale,
        params: ct.params.clone(),
    })
}
