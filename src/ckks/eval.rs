use std::collections::BTreeMap;
use std::sync::Arc;

use num_complex::Complex64;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::ckks::ciphertext::{Ciphertext, Operand};
use crate::ckks::encoder::integer_residues;
use crate::ckks::keys::{RelinearizationKey, RotationKey, RotationKeys, SwitchingKey};
use crate::ckks::keyswitch::{switch_component, switch_digits};
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Relative difference under which two scales are treated as equal.
pub const SCALE_TOLERANCE: f64 = 1.0 / (1u64 << 20) as f64;

pub(crate) fn scales_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCALE_TOLERANCE * a.abs().max(b.abs())
}

/// Integer factors (for lhs, rhs) that bring two scales together.
///
/// Equal scales need nothing; otherwise the smaller side is multiplied by
/// round(max / min) when that ratio is an integer within tolerance.
pub(crate) fn scale_factors(lhs: f64, rhs: f64) -> Result<(u64, u64)> {
    if scales_match(lhs, rhs) {
        return Ok((1, 1));
    }
    let (lo, hi) = if lhs < rhs { (lhs, rhs) } else { (rhs, lhs) };
    let ratio = (hi / lo).round();
    if lo > 0.0 && ratio >= 2.0 && ratio < u64::MAX as f64 && scales_match(lo * ratio, hi) {
        let r = ratio as u64;
        return Ok(if lhs < rhs { (r, 1) } else { (1, r) });
    }
    Err(HeError::ScaleMismatch { lhs, rhs })
}

fn is_integral(c: Complex64) -> bool {
    const EXACT: f64 = (1u64 << 53) as f64;
    c.re.fract() == 0.0 && c.im.fract() == 0.0 && c.re.abs() < EXACT && c.im.abs() < EXACT
}

/// Keys an [`Evaluator`] may use.
#[derive(Clone, Debug, Default)]
pub struct EvaluationKeySet {
    pub relin: Option<RelinearizationKey>,
    pub rotations: Option<RotationKeys>,
}

/// Homomorphic operators.
///
/// Every operator mutates its first argument in place and checks all of its
/// preconditions before touching it, so a failed call leaves the destination
/// as it was. Use [`Ciphertext::fresh`] to get a new ciphertext instead.
#[derive(Clone, Debug)]
pub struct Evaluator {
    params: Arc<CkksParams>,
    keys: EvaluationKeySet,
    /// X^(N/2) in NTT form over Q_L; multiplies every slot by i.
    monomial_i: RnsPoly,
}

impl Evaluator {
    pub fn new(params: &Arc<CkksParams>, keys: EvaluationKeySet) -> Result<Self> {
        let n = params.ring_degree;
        let mut x = vec![0i64; n];
        x[n / 2] = 1;
        let monomial_i = params.ring_q.poly_from_signed(&x, params.max_level() + 1)?;
        Ok(Self {
            params: params.clone(),
            keys,
            monomial_i,
        })
    }

    pub fn params(&self) -> &Arc<CkksParams> {
        &self.params
    }

    pub fn keys(&self) -> &EvaluationKeySet {
        &self.keys
    }

    fn check_level<O: Operand + ?Sized>(&self, dst: &Ciphertext, rhs: &O) -> Result<usize> {
        if dst.level() != rhs.level() {
            return Err(HeError::LevelMismatch {
                expected: dst.level(),
                got: rhs.level(),
            });
        }
        Ok(dst.level())
    }

    fn residues(&self, value: f64, level: usize) -> Result<Vec<u64>> {
        integer_residues(value, &self.params.q_moduli()[..=level])
    }

    /// round(c.re·scale) + round(c.im·scale)·X^(N/2) over Q_level.
    pub(crate) fn const_poly(&self, c: Complex64, scale: f64, level: usize) -> Result<RnsPoly> {
        let re = self.residues(c.re * scale, level)?;
        let im = self.residues(c.im * scale, level)?;
        let mut poly = self.monomial_i.prefix(level + 1);
        poly.mul_rns_scalar_assign(&im)?;
        poly.add_rns_scalar_assign(&re)?;
        Ok(poly)
    }

    fn combine<O: Operand + ?Sized>(&self, dst: &mut Ciphertext, rhs: &O, subtract: bool) -> Result<()> {
        let level = self.check_level(dst, rhs)?;
        let (lf, rf) = scale_factors(dst.scale, rhs.scale())?;
        let lf = (lf != 1).then(|| self.residues(lf as f64, level)).transpose()?;
        let rf = (rf != 1).then(|| self.residues(rf as f64, level)).transpose()?;

        if let Some(r) = &lf {
            for c in dst.value.iter_mut() {
                c.mul_rns_scalar_assign(r)?;
            }
        }
        dst.scale = dst.scale.max(rhs.scale());
        while dst.value.len() < rhs.polys().len() {
            dst.value.push(self.params.ring_q.zero(level + 1));
        }
        for (d, s) in dst.value.iter_mut().zip(rhs.polys()) {
            let scaled;
            let s = match &rf {
                Some(r) => {
                    let mut t = s.clone();
                    t.mul_rns_scalar_assign(r)?;
                    scaled = t;
                    &scaled
                }
                None => s,
            };
            if subtract {
                d.sub_assign(s)?;
            } else {
                d.add_assign(s)?;
            }
        }
        Ok(())
    }

    /// dst += rhs
    pub fn add<O: Operand + ?Sized>(&self, dst: &mut Ciphertext, rhs: &O) -> Result<()> {
        self.combine(dst, rhs, false)
    }

    /// dst -= rhs
    pub fn sub<O: Operand + ?Sized>(&self, dst: &mut Ciphertext, rhs: &O) -> Result<()> {
        self.combine(dst, rhs, true)
    }

    pub fn neg(&self, dst: &mut Ciphertext) -> Result<()> {
        for c in dst.value.iter_mut() {
            c.neg_assign();
        }
        Ok(())
    }

    /// Add a complex constant to every slot.
    pub fn add_const(&self, dst: &mut Ciphertext, c: Complex64) -> Result<()> {
        let poly = self.const_poly(c, dst.scale, dst.level())?;
        dst.value[0].add_assign(&poly)
    }

    /// Multiply every slot by a complex constant.
    ///
    /// Gaussian integers leave the scale alone. Any other constant is encoded
    /// at scale q_level and multiplies the ciphertext scale by it, ready for
    /// one rescale.
    pub fn mult_by_const(&self, dst: &mut Ciphertext, c: Complex64) -> Result<()> {
        let level = dst.level();
        let const_scale = if is_integral(c) {
            1.0
        } else {
            self.params.q_moduli()[level] as f64
        };
        let poly = self.const_poly(c, const_scale, level)?;
        for comp in dst.value.iter_mut() {
            comp.mul_assign(&poly)?;
        }
        dst.scale *= const_scale;
        Ok(())
    }

    /// dst += src·c, with the constant scaled to land on dst's scale.
    ///
    /// When dst does not carry a larger scale than src and `c` is not a
    /// Gaussian integer, dst is first lifted by q_level.
    pub fn mul_by_const_and_add(&self, dst: &mut Ciphertext, src: &Ciphertext, c: Complex64) -> Result<()> {
        let level = self.check_level(dst, src)?;
        let q_l = self.params.q_moduli()[level];
        let same = scales_match(dst.scale, src.scale);
        let lift = !(is_integral(c) && same) && dst.scale < src.scale * (1.0 + SCALE_TOLERANCE);
        let dst_scale = if lift { dst.scale * q_l as f64 } else { dst.scale };
        let const_scale = if same && !lift { 1.0 } else { dst_scale / src.scale };
        let poly = self.const_poly(c, const_scale, level)?;
        let lift_residues = if lift { Some(self.residues(q_l as f64, level)?) } else { None };

        if let Some(r) = &lift_residues {
            for comp in dst.value.iter_mut() {
                comp.mul_rns_scalar_assign(r)?;
            }
        }
        dst.scale = dst_scale;
        while dst.value.len() < src.value.len() {
            dst.value.push(self.params.ring_q.zero(level + 1));
        }
        for (d, s) in dst.value.iter_mut().zip(&src.value) {
            d.add_assign(&s.mul(&poly)?)?;
        }
        Ok(())
    }

    /// Multiply every slot by i; consumes no level.
    pub fn mul_by_i(&self, dst: &mut Ciphertext) -> Result<()> {
        self.mult_by_const(dst, Complex64::new(0.0, 1.0))
    }

    /// Divide every slot by i; consumes no level.
    pub fn div_by_i(&self, dst: &mut Ciphertext) -> Result<()> {
        self.mult_by_const(dst, Complex64::new(0.0, -1.0))
    }

    fn relin_key(&self) -> Result<&RelinearizationKey> {
        self.keys
            .relin
            .as_ref()
            .ok_or_else(|| HeError::MissingKey("relinearization key".into()))
    }

    fn rotation_keys(&self) -> Result<&RotationKeys> {
        self.keys
            .rotations
            .as_ref()
            .ok_or_else(|| HeError::MissingKey("rotation keys".into()))
    }

    /// Tensor product dst ⊗ rhs, followed by relinearization when `relin`.
    ///
    /// With `relin = false` a product of two linear ciphertexts stays at
    /// degree 2. The scale becomes the product of both scales.
    pub fn mul_relin<O: Operand + ?Sized>(&self, dst: &mut Ciphertext, rhs: &O, relin: bool) -> Result<()> {
        let level = self.check_level(dst, rhs)?;
        let degree = dst.degree() + rhs.degree();
        if relin && degree > 2 {
            return Err(HeError::DegreeMismatch { expected: 2, got: degree });
        }
        if relin && degree == 2 {
            self.relin_key()?;
        }

        let mut out: Vec<RnsPoly> = (0..=degree).map(|_| self.params.ring_q.zero(level + 1)).collect();
        for (i, a) in dst.value.iter().enumerate() {
            for (j, b) in rhs.polys().iter().enumerate() {
                out[i + j].add_assign(&a.mul(b)?)?;
            }
        }
        dst.value = out;
        dst.scale *= rhs.scale();
        if relin && degree == 2 {
            self.relinearize(dst)?;
        }
        Ok(())
    }

    /// Fold a degree-2 ciphertext back to degree 1 with the key for s².
    #[instrument(skip_all, fields(level = dst.level()))]
    pub fn relinearize(&self, dst: &mut Ciphertext) -> Result<()> {
        if dst.degree() != 2 {
            return Err(HeError::DegreeMismatch {
                expected: 2,
                got: dst.degree(),
            });
        }
        let key = self.relin_key()?;
        let (d0, d1) = switch_component(&self.params, &dst.value[2], &key.key)?;
        dst.value[0].add_assign(&d0)?;
        dst.value[1].add_assign(&d1)?;
        dst.value.truncate(2);
        Ok(())
    }

    /// Divide by the top modulus q_level and drop it.
    pub fn rescale(&self, dst: &mut Ciphertext) -> Result<()> {
        self.rescale_many(dst, 1)
    }

    /// `n` consecutive rescales.
    pub fn rescale_many(&self, dst: &mut Ciphertext, n: usize) -> Result<()> {
        let level = dst.level();
        if level < n {
            return Err(HeError::LevelUnderflow { level, needed: n });
        }
        for _ in 0..n {
            let q_l = self.params.q_moduli()[dst.level()];
            for c in dst.value.iter_mut() {
                c.rescale_assign()?;
            }
            dst.scale /= q_l as f64;
        }
        debug!(from = level, to = dst.level(), scale = dst.scale, "rescale");
        Ok(())
    }

    /// Drop `n` moduli without dividing; the scale is unchanged.
    pub fn drop_level(&self, dst: &mut Ciphertext, n: usize) -> Result<()> {
        let level = dst.level();
        if level < n {
            return Err(HeError::LevelUnderflow { level, needed: n });
        }
        for c in dst.value.iter_mut() {
            c.truncate(level + 1 - n);
        }
        debug!(from = level, to = dst.level(), "drop level");
        Ok(())
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

    /// Re-encrypt under the output secret of `key`.
    #[instrument(skip_all, fields(level = dst.level()))]
    pub fn switch_keys(&self, dst: &mut Ciphertext, key: &SwitchingKey) -> Result<()> {
        Self::check_linear(dst)?;
        let (d0, d1) = switch_component(&self.params, &dst.value[1], key)?;
        dst.value[0].add_assign(&d0)?;
        dst.value[1] = d1;
        Ok(())
    }

    fn automorphism(&self, dst: &mut Ciphertext, key: &RotationKey) -> Result<()> {
        Self::check_linear(dst)?;
        let c1 = dst.value[1].permute(&key.permutation);
        let (d0, d1) = switch_component(&self.params, &c1, &key.key)?;
        let mut c0 = dst.value[0].permute(&key.permutation);
        c0.add_assign(&d0)?;
        dst.value = vec![c0, d1];
        Ok(())
    }

    /// Rotate slots left by `k` (right for negative `k`).
    #[instrument(skip_all, fields(k))]
    pub fn rotate(&self, dst: &mut Ciphertext, k: i64) -> Result<()> {
        if self.params.rotation_element(k) == 1 {
            return Ok(());
        }
        let key = self.rotation_keys()?.for_rotation(k)?;
        self.automorphism(dst, key)
    }

    /// Complex-conjugate every slot.
    #[instrument(skip_all)]
    pub fn conjugate(&self, dst: &mut Ciphertext) -> Result<()> {
        let key = self.rotation_keys()?.for_conjugation()?;
        self.automorphism(dst, key)
    }

    /// Several rotations of one ciphertext sharing a single decomposition.
    ///
    /// The digits of c1 are computed once and permuted per rotation in the
    /// NTT domain; only the inner product and ModDown are repeated.
    #[instrument(skip_all, fields(count = rotations.len()))]
    pub fn rotate_hoisted(&self, ct: &Ciphertext, rotations: &[i64]) -> Result<BTreeMap<i64, Ciphertext>> {
        Self::check_linear(ct)?;
        let mut jobs: Vec<(i64, Option<&RotationKey>)> = Vec::with_capacity(rotations.len());
        for &k in rotations {
            if self.params.rotation_element(k) == 1 {
                jobs.push((k, None));
            } else {
                jobs.push((k, Some(self.rotation_keys()?.for_rotation(k)?)));
            }
        }

        let digits = self.params.extender.decompose(&ct.value[1])?;
        jobs.into_par_iter()
            .map(|(k, key)| -> Result<(i64, Ciphertext)> {
                let Some(key) = key else {
                    return Ok((k, ct.clone()));
                };
                let permuted: Vec<_> = digits.iter().map(|d| d.permute(&key.permutation)).collect();
                let (d0, d1) = switch_digits(&self.params, &permuted, &key.key)?;
                let mut c0 = ct.value[0].permute(&key.permutation);
                c0.add_assign(&d0)?;
                Ok((
                    k,
                    Ciphertext {
                        value: vec![c0, d1],
                        scale: ct.scale,
                        params: ct.params.clone(),
                    },
                ))
            })
            .collect()
    }
}
