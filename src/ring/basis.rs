use std::ops::Range;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rayon::prelude::*;

use crate::error::{HeError, Result};
use crate::ring::modular::{
    barrett_constant, mod_add, mod_inv, mod_mul, mod_sub, mul_shoup, shoup_precompute,
};
use crate::ring::ntt::NttPoly;
use crate::ring::rns::{QpPoly, RnsBasis, RnsPoly};

/// Fast (approximate) base conversion from a source set of moduli to a target set.
///
/// For x given by its residues x_i mod s_i, the output is
/// Σ_i [x_i·(S/s_i)^{-1}]_{s_i} · (S/s_i) mod t_j, which equals x + u·S for
/// some 0 ≤ u < |source|.
#[derive(Clone, Debug)]
pub struct BaseConverter {
    src: Vec<u64>,
    dst: Vec<u64>,
    hat_inv: Vec<u64>,
    hat_inv_shoup: Vec<u64>,
    /// hat_mod_dst[j][i] = (S/s_i) mod t_j
    hat_mod_dst: Vec<Vec<u64>>,
}

impl BaseConverter {
    pub fn new(src: &[u64], dst: &[u64]) -> Result<Self> {
        let mut hat_inv = Vec::with_capacity(src.len());
        for (i, &si) in src.iter().enumerate() {
            let bk = barrett_constant(si);
            let hat = src
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i)
                .fold(1u64, |acc, (_, &sk)| mod_mul(acc, sk % si, si, bk));
            hat_inv.push(mod_inv(hat, si).ok_or_else(|| {
                HeError::ParameterInvalid(format!("modulus {si} is not coprime to the rest of its digit"))
            })?);
        }
        let hat_inv_shoup = hat_inv
            .iter()
            .zip(src)
            .map(|(&h, &s)| shoup_precompute(h, s))
            .collect();

        let hat_mod_dst = dst
            .iter()
            .map(|&t| {
                let bk = barrett_constant(t);
                (0..src.len())
                    .map(|i| {
                        src.iter()
                            .enumerate()
                            .filter(|&(k, _)| k != i)
                            .fold(1u64, |acc, (_, &sk)| mod_mul(acc, sk % t, t, bk))
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            src: src.to_vec(),
            dst: dst.to_vec(),
            hat_inv,
            hat_inv_shoup,
            hat_mod_dst,
        })
    }

    /// Convert coefficient-domain limbs over the source basis. Produces the
    /// first `count` target limbs.
    pub fn convert(&self, input: &[&[u64]], count: usize) -> Vec<Vec<u64>> {
        debug_assert_eq!(input.len(), self.src.len());
        let n = input.first().map_or(0, |l| l.len());
        let y: Vec<Vec<u64>> = input
            .iter()
            .enumerate()
            .map(|(i, limb)| {
                let (s, h, hs) = (self.src[i], self.hat_inv[i], self.hat_inv_shoup[i]);
                limb.iter().map(|&x| mul_shoup(x, h, hs, s)).collect()
            })
            .collect();

        self.dst[..count]
            .par_iter()
            .zip(self.hat_mod_dst[..count].par_iter())
            .map(|(&t, hats)| {
                let bk = barrett_constant(t);
                (0..n)
                    .map(|x| {
                        y.iter().zip(hats).fold(0u64, |acc, (yi, &h)| {
                            mod_add(acc, mod_mul(yi[x] % t, h, t, bk), t)
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

/// RNS hybrid key-switching basis: digit decomposition with lift to Q·P
/// (ModUp) and division by P with rounding (ModDown).
///
/// Digit j at level l covers Q indices [j·alpha, (j+1)·alpha) ∩ [0, l].
#[derive(Clone, Debug)]
pub struct Extender {
    ring_q: Arc<RnsBasis>,
    ring_p: Arc<RnsBasis>,
    alpha: usize,
    /// mod_up[level][digit]: digit group -> (Q_level without the group) ++ P
    mod_up: Vec<Vec<BaseConverter>>,
    /// P -> Q, truncated to the level at use.
    mod_down: BaseConverter,
    p_inv_mod_q: Vec<u64>,
    half_p_mod_q: Vec<u64>,
    half_p_mod_p: Vec<u64>,
    p_mod_q: Vec<u64>,
}

impl Extender {
    pub fn new(ring_q: Arc<RnsBasis>, ring_p: Arc<RnsBasis>) -> Result<Self> {
        let q = &ring_q.moduli;
        let p = &ring_p.moduli;
        let alpha = p.len();
        if alpha == 0 || q.is_empty() {
            return Err(HeError::ParameterInvalid(
                "key switching needs at least one Q and one P modulus".into(),
            ));
        }

        let mut mod_up = Vec::with_capacity(q.len());
        for level in 0..q.len() {
            let beta = (level + 1).div_ceil(alpha);
            let mut per_digit = Vec::with_capacity(beta);
            for j in 0..beta {
                let group = digit_range(alpha, level, j);
                let dst: Vec<u64> = q[..=level]
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !group.contains(i))
                    .map(|(_, &qi)| qi)
                    .chain(p.iter().copied())
                    .collect();
                per_digit.push(BaseConverter::new(&q[group], &dst)?);
            }
            mod_up.push(per_digit);
        }

        let mod_down = BaseConverter::new(p, q)?;

        let mut p_mod_q = Vec::with_capacity(q.len());
        let mut p_inv_mod_q = Vec::with_capacity(q.len());
        let mut half_p_mod_q = Vec::with_capacity(q.len());
        let big_p = ring_p.modulus_product(alpha);
        let half_p = &big_p >> 1;
        for &qi in q {
            let pm = residue(&big_p, qi);
            p_mod_q.push(pm);
            p_inv_mod_q.push(mod_inv(pm, qi).ok_or_else(|| {
                HeError::ParameterInvalid(format!("P is not invertible modulo {qi}"))
            })?);
            half_p_mod_q.push(residue(&half_p, qi));
        }
        let half_p_mod_p = p.iter().map(|&pk| residue(&half_p, pk)).collect();

        Ok(Self {
            ring_q,
            ring_p,
            alpha,
            mod_up,
            mod_down,
            p_inv_mod_q,
            half_p_mod_q,
            half_p_mod_p,
            p_mod_q,
        })
    }

    pub fn alpha(&self) -> usize {
        self.alpha
    }

    /// Number of digits at `level`.
    pub fn beta(&self, level: usize) -> usize {
        (level + 1).div_ceil(self.alpha)
    }

    pub fn digit_range(&self, level: usize, digit: usize) -> Range<usize> {
        digit_range(self.alpha, level, digit)
    }

    /// P mod q_i, the gadget factor a key places on the residues of its own digit.
    pub fn p_mod_q(&self) -> &[u64] {
        &self.p_mod_q
    }

    pub fn ring_q(&self) -> &Arc<RnsBasis> {
        &self.ring_q
    }

    pub fn ring_p(&self) -> &Arc<RnsBasis> {
        &self.ring_p
    }

    /// Split `c` (level l, NTT domain) into its digits, each lifted to Q_l ∪ P.
    pub fn decompose(&self, c: &RnsPoly) -> Result<Vec<QpPoly>> {
        let level = c.level();
        if level >= self.mod_up.len() {
            return Err(HeError::LevelMismatch {
                expected: self.mod_up.len() - 1,
                got: level,
            });
        }
        let coeffs = c.to_coeff_limbs();
        (0..self.beta(level))
            .into_par_iter()
            .map(|j| self.lift_digit(c, &coeffs, level, j))
            .collect()
    }

    fn lift_digit(&self, c: &RnsPoly, coeffs: &[Vec<u64>], level: usize, j: usize) -> Result<QpPoly> {
        let group = self.digit_range(level, j);
        let input: Vec<&[u64]> = coeffs[group.clone()].iter().map(|v| v.as_slice()).collect();
        let conv = &self.mod_up[level][j];
        let mut converted = conv.convert(&input, conv.dst.len()).into_iter();

        let mut q_limbs = Vec::with_capacity(level + 1);
        for i in 0..=level {
            if group.contains(&i) {
                q_limbs.push(None);
            } else {
                q_limbs.push(converted.next());
            }
        }
        let p_limbs: Vec<Vec<u64>> = converted.collect();

        let mut q_part = self.ring_q.zero(level + 1);
        for (i, limb) in q_limbs.into_iter().enumerate() {
            q_part.components[i] = match limb {
                // residues of the digit's own moduli are those of c itself
                None => c.components[i].clone(),
                Some(v) => NttPoly::from_coeffs(v, self.ring_q.plans[i].clone())?,
            };
        }
        let p_part = self.ring_p.poly_from_coeff_limbs(p_limbs)?;
        Ok(QpPoly { q: q_part, p: p_part })
    }

    /// Compute round(x / P) for x given over Q_l ∪ P; result over Q_l.
    pub fn mod_down(&self, x: &QpPoly) -> Result<RnsPoly> {
        let level = x.level();
        let mut p_coeffs = x.p.to_coeff_limbs();
        for (limb, (&h, &pk)) in p_coeffs
            .iter_mut()
            .zip(self.half_p_mod_p.iter().zip(self.ring_p.moduli.iter()))
        {
            for v in limb.iter_mut() {
                *v = mod_add(*v, h, pk);
            }
        }
        let input: Vec<&[u64]> = p_coeffs.iter().map(|v| v.as_slice()).collect();
        let mut conv = self.mod_down.convert(&input, level + 1);
        for (limb, (&h, &qi)) in conv
            .iter_mut()
            .zip(self.half_p_mod_q.iter().zip(self.ring_q.moduli.iter()))
        {
            for v in limb.iter_mut() {
                *v = mod_sub(*v, h, qi);
            }
        }
        let conv = self.ring_q.poly_from_coeff_limbs(conv)?;

        let mut out = x.q.sub(&conv)?;
        out.mul_rns_scalar_assign(&self.p_inv_mod_q)?;
        Ok(out)
    }

    /// Multiply a Q-level polynomial by P and embed it in Q_l ∪ P (zero on P).
    pub fn mul_by_p(&self, x: &RnsPoly) -> Result<QpPoly> {
        let mut q = x.clone();
        q.mul_rns_scalar_assign(&self.p_mod_q)?;
        Ok(QpPoly {
            q,
            p: self.ring_p.zero(self.alpha),
        })
    }
}

fn digit_range(alpha: usize, level: usize, digit: usize) -> Range<usize> {
    let start = digit * alpha;
    let end = ((digit + 1) * alpha).min(level + 1);
    start..end.max(start)
}

fn residue(x: &BigUint, m: u64) -> u64 {
    (x % m).to_u64().unwrap_or(0)
}
