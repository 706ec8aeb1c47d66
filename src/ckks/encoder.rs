use std::f64::consts::PI;
use std::sync::Arc;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::ckks::plaintext::Plaintext;
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::galois::GALOIS_GENERATOR;
use crate::ring::rns::{bigint_residue, RnsPoly};

/// Representation an encoding is delivered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Per-limb coefficient vectors.
    Coefficients,
    /// RNS polynomial in NTT form.
    Ntt,
    /// A [`Plaintext`] carrying level and scale.
    Plaintext,
}

/// Result of [`Encoder::encode`], tagged by [`OutputKind`].
#[derive(Clone, Debug)]
pub enum Encoded {
    Coefficients(Vec<Vec<u64>>),
    Ntt(RnsPoly),
    Plaintext(Plaintext),
}

/// Canonical-embedding codec between complex slot vectors and ring elements.
///
/// Slot i corresponds to the evaluation at ζ^(5^i) for ζ = e^(iπ/N), so the
/// automorphism X -> X^(5^k) rotates slots left by k and X -> X^(-1)
/// conjugates them.
#[derive(Clone, Debug)]
pub struct Encoder {
    params: Arc<CkksParams>,
    m: usize,
    rot_group: Vec<usize>,
    roots: Vec<Complex64>,
}

impl Encoder {
    pub fn new(params: &Arc<CkksParams>) -> Self {
        let n = params.ring_degree;
        let m = 2 * n;
        let mut rot_group = Vec::with_capacity(n / 2);
        let mut g = 1usize;
        for _ in 0..n / 2 {
            rot_group.push(g);
            g = g * GALOIS_GENERATOR as usize % m;
        }
        let roots = (0..=m)
            .map(|i| Complex64::from_polar(1.0, 2.0 * PI * i as f64 / m as f64))
            .collect();
        Self {
            params: params.clone(),
            m,
            rot_group,
            roots,
        }
    }

    pub fn params(&self) -> &Arc<CkksParams> {
        &self.params
    }

    fn check_level(&self, level: usize) -> Result<()> {
        if level > self.params.max_level() {
            return Err(HeError::LevelMismatch {
                expected: self.params.max_level(),
                got: level,
            });
        }
        Ok(())
    }

    /// Encode up to `slots` complex values at `level` and `scale`.
    pub fn encode(&self, values: &[Complex64], level: usize, scale: f64, kind: OutputKind) -> Result<Encoded> {
        let poly = self.embed(values, level, scale)?;
        Ok(match kind {
            OutputKind::Coefficients => Encoded::Coefficients(poly.to_coeff_limbs()),
            OutputKind::Ntt => Encoded::Ntt(poly),
            OutputKind::Plaintext => Encoded::Plaintext(self.plaintext(poly, scale)),
        })
    }

    fn embed(&self, values: &[Complex64], level: usize, scale: f64) -> Result<RnsPoly> {
        self.check_level(level)?;
        let slots = self.params.slots();
        if values.len() > slots {
            return Err(HeError::DimensionMismatch {
                expected: slots,
                got: values.len(),
            });
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(HeError::ParameterInvalid(format!("scale must be positive, got {scale}")));
        }

        let mut w = values.to_vec();
        w.resize(slots, Complex64::new(0.0, 0.0));
        self.special_ifft(&mut w);

        let n = self.params.ring_degree;
        let gap = (n / 2) / slots;
        let mut coeffs = vec![0.0f64; n];
        for (i, z) in w.iter().enumerate() {
            coeffs[i * gap] = z.re * scale;
            coeffs[n / 2 + i * gap] = z.im * scale;
        }
        round_to_poly(&self.params, &coeffs, level)
    }

    fn plaintext(&self, value: RnsPoly, scale: f64) -> Plaintext {
        Plaintext {
            value,
            scale,
            params: self.params.clone(),
        }
    }

    /// Encode into a [`Plaintext`].
    pub fn encode_plaintext(&self, values: &[Complex64], level: usize, scale: f64) -> Result<Plaintext> {
        Ok(self.plaintext(self.embed(values, level, scale)?, scale))
    }

    /// Encode real values into a [`Plaintext`].
    pub fn encode_real(&self, values: &[f64], level: usize, scale: f64) -> Result<Plaintext> {
        let complex: Vec<Complex64> = values.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        self.encode_plaintext(&complex, level, scale)
    }

    /// Decode all slots of a plaintext.
    pub fn decode(&self, pt: &Plaintext) -> Result<Vec<Complex64>> {
        let n = self.params.ring_degree;
        let slots = self.params.slots();
        let gap = (n / 2) / slots;
        let coeffs = self.unlift(pt)?;
        let mut w: Vec<Complex64> = (0..slots)
            .map(|i| Complex64::new(coeffs[i * gap], coeffs[n / 2 + i * gap]))
            .collect();
        self.special_fft(&mut w);
        Ok(w)
    }

    pub fn decode_real(&self, pt: &Plaintext) -> Result<Vec<f64>> {
        Ok(self.decode(pt)?.into_iter().map(|z| z.re).collect())
    }

    /// Coefficient packing: value i becomes round(values[i]·scale)·X^i.
    pub fn encode_coeffs(&self, values: &[f64], level: usize, scale: f64) -> Result<Plaintext> {
        self.check_level(level)?;
        let n = self.params.ring_degree;
        if values.len() > n {
            return Err(HeError::DimensionMismatch {
                expected: n,
                got: values.len(),
            });
        }
        let mut coeffs: Vec<f64> = values.iter().map(|&x| x * scale).collect();
        coeffs.resize(n, 0.0);
        Ok(self.plaintext(round_to_poly(&self.params, &coeffs, level)?, scale))
    }

    /// Inverse of [`Encoder::encode_coeffs`]: all N coefficients divided by the scale.
    pub fn decode_coeffs(&self, pt: &Plaintext) -> Result<Vec<f64>> {
        self.unlift(pt)
    }

    fn unlift(&self, pt: &Plaintext) -> Result<Vec<f64>> {
        if pt.value.ring_degree != self.params.ring_degree {
            return Err(HeError::DimensionMismatch {
                expected: self.params.ring_degree,
                got: pt.value.ring_degree,
            });
        }
        Ok(pt
            .value
            .to_bigints_centered()
            .iter()
            .map(|c| c.to_f64().unwrap_or(f64::NAN) / pt.scale)
            .collect())
    }

    /// Inverse canonical embedding restricted to the slot subring.
    fn special_ifft(&self, vals: &mut [Complex64]) {
        let n = vals.len();
        let mut len = n;
        while len >= 2 {
            let lenh = len >> 1;
            let lenq = len << 2;
            let gap = self.m / lenq;
            for i in (0..n).step_by(len) {
                for j in 0..lenh {
                    let idx = (lenq - (self.rot_group[j] % lenq)) * gap;
                    let u = vals[i + j] + vals[i + j + lenh];
                    let v = (vals[i + j] - vals[i + j + lenh]) * self.roots[idx];
                    vals[i + j] = u;
                    vals[i + j + lenh] = v;
                }
            }
            len >>= 1;
        }
        let inv_n = 1.0 / n as f64;
        for v in vals.iter_mut() {
            *v *= inv_n;
        }
        bit_reverse_in_place(vals);
    }

    fn special_fft(&self, vals: &mut [Complex64]) {
        let n = vals.len();
        bit_reverse_in_place(vals);
        let mut len = 2;
        while len <= n {
            let lenh = len >> 1;
            let lenq = len << 2;
            let gap = self.m / lenq;
            for i in (0..n).step_by(len) {
                for j in 0..lenh {
                    let idx = (self.rot_group[j] % lenq) * gap;
                    let u = vals[i + j];
                    let v = vals[i + j + lenh] * self.roots[idx];
                    vals[i + j] = u + v;
                    vals[i + j + lenh] = u - v;
                }
            }
            len <<= 1;
        }
    }
}

fn bit_reverse(x: usize, bits: u32) -> usize {
    if bits == 0 {
        return 0;
    }
    x.reverse_bits() >> (usize::BITS - bits)
}

fn bit_reverse_in_place<T>(vals: &mut [T]) {
    let n = vals.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = bit_reverse(i, bits);
        if i < j {
            vals.swap(i, j);
        }
    }
}

/// Round real coefficients to integers and lift them into Q_level.
pub(crate) fn round_to_poly(params: &CkksParams, coeffs: &[f64], level: usize) -> Result<RnsPoly> {
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(HeError::ParameterInvalid("cannot encode a non-finite value".into()));
    }
    const SMALL: f64 = (1u64 << 62) as f64;
    if coeffs.iter().all(|c| c.abs() < SMALL) {
        let rounded: Vec<i64> = coeffs.iter().map(|c| c.round() as i64).collect();
        return params.ring_q.poly_from_signed(&rounded, level + 1);
    }
    let big: Vec<BigInt> = coeffs
        .iter()
        .map(|c| BigInt::from_f64(c.round()).unwrap_or_default())
        .collect();
    params.ring_q.poly_from_bigints(&big, level + 1)
}

/// Residues of round(value) modulo each modulus.
pub(crate) fn integer_residues(value: f64, moduli: &[u64]) -> Result<Vec<u64>> {
    if !value.is_finite() {
        return Err(HeError::ParameterInvalid(format!("constant {value} is not finite")));
    }
    let r = value.round();
    if r.abs() < 2f64.powi(126) {
        let v = r as i128;
        return Ok(moduli.iter().map(|&q| v.rem_euclid(q as i128) as u64).collect());
    }
    let big = BigInt::from_f64(r).unwrap_or_default();
    Ok(moduli.iter().map(|&q| bigint_residue(&big, q)).collect())
}
