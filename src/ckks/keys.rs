use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::instrument;
use zeroize::Zeroize;

use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::galois::{conjugation_element, ntt_permutation};
use crate::ring::rns::{QpPoly, RnsPoly};
use crate::sampling::{
    sample_gaussian_signed, sample_ternary_hamming, sample_ternary_signed, sample_uniform_rns,
};

/// Secret key s, ternary, held over Q_L ∪ P in NTT form.
#[derive(Clone)]
pub struct SecretKey {
    pub value: QpPoly,
    pub params: Arc<CkksParams>,
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey").finish_non_exhaustive()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        for comp in self.value.q.components.iter_mut().chain(self.value.p.components.iter_mut()) {
            comp.evals.zeroize();
        }
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// Public key (b, a) with b = -a·s + e over Q_L ∪ P.
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKey {
    pub b: QpPoly,
    pub a: QpPoly,
    pub params: Arc<CkksParams>,
}

/// Hybrid switching key from s_in to s_out.
///
/// Digit j holds (k0_j, k1_j) = (-a_j·s_out + e_j + P·G_j·s_in, a_j) over
/// Q_L ∪ P, where G_j is 1 on the moduli of digit j and 0 elsewhere. Both
/// halves are kept in Montgomery form for the multiply-accumulate.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchingKey {
    pub value: Vec<[QpPoly; 2]>,
    pub params: Arc<CkksParams>,
}

/// Switching key from s² to s.
#[derive(Clone, Debug, PartialEq)]
pub struct RelinearizationKey {
    pub key: SwitchingKey,
}

/// Switching key from φ_g(s) to s, with the NTT index table of φ_g.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationKey {
    pub key: SwitchingKey,
    pub galois: usize,
    pub permutation: Vec<usize>,
}

impl RotationKey {
    pub(crate) fn new(key: SwitchingKey, galois: usize) -> Self {
        let permutation = ntt_permutation(&key.params.ring_q.order, galois);
        Self {
            key,
            galois,
            permutation,
        }
    }
}

/// Rotation keys indexed by Galois element.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationKeys {
    pub keys: BTreeMap<usize, RotationKey>,
    pub params: Arc<CkksParams>,
}

impl RotationKeys {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        Self {
            keys: BTreeMap::new(),
            params: params.clone(),
        }
    }

    pub fn insert(&mut self, key: RotationKey) {
        self.keys.insert(key.galois, key);
    }

    /// Key for a slot rotation by `k` (negative rotates right).
    pub fn for_rotation(&self, k: i64) -> Result<&RotationKey> {
        let g = self.params.rotation_element(k);
        self.keys
            .get(&g)
            .ok_or_else(|| HeError::MissingKey(format!("rotation by {k} (galois element {g})")))
    }

    pub fn for_conjugation(&self) -> Result<&RotationKey> {
        let g = conjugation_element(self.params.ring_degree);
        self.keys
            .get(&g)
            .ok_or_else(|| HeError::MissingKey("conjugation".into()))
    }

    pub fn galois_elements(&self) -> impl Iterator<Item = usize> + '_ {
        self.keys.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Gaussian error over Q_L ∪ P.
pub(crate) fn gaussian_qp<R: rand::Rng + ?Sized>(params: &CkksParams, sigma: f64, rng: &mut R) -> Result<QpPoly> {
    let e = sample_gaussian_signed(params.ring_degree, sigma, rng);
    QpPoly::from_signed(&params.ring_q, &params.ring_p, &e, params.max_level())
}

/// Gaussian error over Q_level.
pub(crate) fn gaussian_q<R: rand::Rng + ?Sized>(
    params: &CkksParams,
    sigma: f64,
    level: usize,
    rng: &mut R,
) -> Result<RnsPoly> {
    let e = sample_gaussian_signed(params.ring_degree, sigma, rng);
    params.ring_q.poly_from_signed(&e, level + 1)
}

/// Uniform element of Q_L ∪ P.
pub(crate) fn uniform_qp<R: rand::Rng + ?Sized>(params: &CkksParams, rng: &mut R) -> QpPoly {
    QpPoly {
        q: sample_uniform_rns(&params.ring_q, params.max_level() + 1, rng),
        p: sample_uniform_rns(&params.ring_p, params.alpha(), rng),
    }
}

/// Ternary secret over Q_L ∪ P, with the parameter set's Hamming weight if any.
pub(crate) fn ternary_qp<R: rand::Rng + ?Sized>(params: &CkksParams, rng: &mut R) -> Result<QpPoly> {
    let mut s = match params.hamming_weight {
        Some(h) => sample_ternary_hamming(params.ring_degree, h, rng),
        None => sample_ternary_signed(params.ring_degree, 2.0 / 3.0, rng),
    };
    let out = QpPoly::from_signed(&params.ring_q, &params.ring_p, &s, params.max_level());
    s.zeroize();
    out
}

/// Add P·G_digit·s to `dst`, i.e. (P mod q_i)·s on each Q modulus of the digit.
pub(crate) fn add_gadget_term(params: &CkksParams, dst: &mut QpPoly, s: &RnsPoly, digit: usize) -> Result<()> {
    let p_mod_q = params.extender.p_mod_q();
    for i in params.digit_range(params.max_level(), digit) {
        let term = s.components[i].scalar_mul(p_mod_q[i]);
        dst.q.components[i].add_assign(&term)?;
    }
    Ok(())
}

/// Encrypt `s_in` under `s_out` digit by digit: the common core of every
/// switching key.
pub(crate) fn gadget_encrypt<R: rand::Rng + ?Sized>(
    params: &Arc<CkksParams>,
    s_in: &RnsPoly,
    s_out: &QpPoly,
    rng: &mut R,
) -> Result<SwitchingKey> {
    let mut value = Vec::with_capacity(params.beta());
    for j in 0..params.beta() {
        let a = uniform_qp(params, rng);
        let mut k0 = gaussian_qp(params, params.sigma, rng)?;
        k0.sub_assign(&a.mul(s_out)?)?;
        add_gadget_term(params, &mut k0, s_in, j)?;

        let mut k1 = a;
        k0.mform_assign();
        k1.mform_assign();
        value.push([k0, k1]);
    }
    Ok(SwitchingKey {
        value,
        params: params.clone(),
    })
}

pub fn gen_secret_key(params: &Arc<CkksParams>) -> Result<SecretKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_secret_key_with_rng(params, &mut rng)
}

pub fn gen_secret_key_with_rng<R: rand::Rng + ?Sized>(params: &Arc<CkksParams>, rng: &mut R) -> Result<SecretKey> {
    Ok(SecretKey {
        value: ternary_qp(params, rng)?,
        params: params.clone(),
    })
}

pub fn gen_public_key(sk: &SecretKey) -> Result<PublicKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_public_key_with_rng(sk, &mut rng)
}

pub fn gen_public_key_with_rng<R: rand::Rng + ?Sized>(sk: &SecretKey, rng: &mut R) -> Result<PublicKey> {
    let params = &sk.params;
    let a = uniform_qp(params, rng);
    let mut b = gaussian_qp(params, params.sigma, rng)?;
    b.sub_assign(&a.mul(&sk.value)?)?;
    Ok(PublicKey {
        b,
        a,
        params: params.clone(),
    })
}

/// Key re-encrypting ciphertexts under `sk_in` into ciphertexts under `sk_out`.
pub fn gen_switching_key_with_rng<R: rand::Rng + ?Sized>(
    sk_in: &SecretKey,
    sk_out: &SecretKey,
    rng: &mut R,
) -> Result<SwitchingKey> {
    gadget_encrypt(&sk_out.params, &sk_in.value.q, &sk_out.value, rng)
}

pub fn gen_relin_key(sk: &SecretKey) -> Result<RelinearizationKey> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_relin_key_with_rng(sk, &mut rng)
}

#[instrument(skip_all, fields(beta = sk.params.beta()))]
pub fn gen_relin_key_with_rng<R: rand::Rng + ?Sized>(sk: &SecretKey, rng: &mut R) -> Result<RelinearizationKey> {
    let s_sq = sk.value.q.mul(&sk.value.q)?;
    Ok(RelinearizationKey {
        key: gadget_encrypt(&sk.params, &s_sq, &sk.value, rng)?,
    })
}

/// Rotation key for Galois element `galois`.
pub fn gen_rotation_key_with_rng<R: rand::Rng + ?Sized>(
    sk: &SecretKey,
    galois: usize,
    rng: &mut R,
) -> Result<RotationKey> {
    let n = sk.params.ring_degree;
    if galois % 2 == 0 || galois >= 2 * n {
        return Err(HeError::ParameterInvalid(format!("{galois} is not a Galois element mod {}", 2 * n)));
    }
    let table = ntt_permutation(&sk.params.ring_q.order, galois);
    let s_rot = sk.value.q.permute(&table);
    let key = gadget_encrypt(&sk.params, &s_rot, &sk.value, rng)?;
    Ok(RotationKey {
        key,
        galois,
        permutation: table,
    })
}

/// Rotation keys for the given slot rotations, plus conjugation if asked.
#[instrument(skip_all, fields(count = rotations.len(), conjugate))]
pub fn gen_rotation_keys_with_rng<R: rand::Rng + ?Sized>(
    sk: &SecretKey,
    rotations: &[i64],
    conjugate: bool,
    rng: &mut R,
) -> Result<RotationKeys> {
    let n = sk.params.ring_degree;
    let mut elements: Vec<usize> = rotations.iter().map(|&k| sk.params.rotation_element(k)).collect();
    if conjugate {
        elements.push(conjugation_element(n));
    }
    elements.sort_unstable();
    elements.dedup();

    let mut keys = RotationKeys::new(&sk.params);
    for g in elements.into_iter().filter(|&g| g != 1) {
        keys.insert(gen_rotation_key_with_rng(sk, g, rng)?);
    }
    Ok(keys)
}

pub fn gen_rotation_keys(sk: &SecretKey, rotations: &[i64], conjugate: bool) -> Result<RotationKeys> {
    let mut rng = ChaCha20Rng::from_os_rng();
    gen_rotation_keys_with_rng(sk, rotations, conjugate, &mut rng)
}

/// Keys for every rotation by ±2^i and for conjugation.
pub fn gen_rotation_keys_pow2_with_rng<R: rand::Rng + ?Sized>(sk: &SecretKey, rng: &mut R) -> Result<RotationKeys> {
    let half = (sk.params.ring_degree / 2) as i64;
    let mut rotations = Vec::new();
    let mut k = 1i64;
    while k < half {
        rotations.push(k);
        rotations.push(-k);
        k <<= 1;
    }
    gen_rotation_keys_with_rng(sk, &rotations, true, rng)
}
