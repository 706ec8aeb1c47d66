use std::sync::Arc;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{ToPrimitive, Zero};
use rayon::prelude::*;

use crate::error::{HeError, Result};
use crate::ring::modular::{
    barrett_constant, center, mod_add, mod_inv, mod_mul, reduce_i64, to_montgomery,
};
use crate::ring::ntt::{evaluation_order, make_plan, NttPoly, Plan};

/// Precomputed data for an ordered list of NTT-friendly primes.
///
/// A polynomial over the first `count` moduli of a basis is an [`RnsPoly`]
/// with `count` components; for the Q chain that is level `count - 1`.
#[derive(Clone, Debug)]
pub struct RnsBasis {
    pub moduli: Vec<u64>,
    pub plans: Vec<Arc<Plan>>,
    pub ring_degree: usize,
    /// Barrett constants for each modulus.
    pub barrett_ks: Vec<u64>,
    /// Shared evaluation order of every plan, see [`evaluation_order`].
    pub order: Vec<usize>,
}

impl RnsBasis {
    pub fn new(moduli: Vec<u64>, ring_degree: usize) -> Result<Self> {
        let plans = moduli
            .iter()
            .map(|&q| make_plan(ring_degree, q))
            .collect::<Result<Vec<_>>>()?;
        let barrett_ks = moduli.iter().map(|&q| barrett_constant(q)).collect();
        let first = plans
            .first()
            .ok_or_else(|| HeError::ParameterInvalid("empty modulus list".into()))?;
        let order = evaluation_order(first)?;
        for plan in &plans[1..] {
            if evaluation_order(plan)? != order {
                return Err(HeError::ParameterInvalid(format!(
                    "NTT plan for q={} uses a different slot order",
                    plan.modulus()
                )));
            }
        }
        Ok(Self {
            moduli,
            plans,
            ring_degree,
            barrett_ks,
            order,
        })
    }

    pub fn num_moduli(&self) -> usize {
        self.moduli.len()
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > self.moduli.len() {
            return Err(HeError::DimensionMismatch {
                expected: self.moduli.len(),
                got: count,
            });
        }
        Ok(())
    }

    /// Zero polynomial over the first `count` moduli.
    pub fn zero(&self, count: usize) -> RnsPoly {
        let components = self.plans[..count.min(self.plans.len())]
            .iter()
            .map(|plan| NttPoly::zero(plan.clone()))
            .collect();
        RnsPoly {
            components,
            ring_degree: self.ring_degree,
        }
    }

    /// Product of the first `count` moduli.
    pub fn modulus_product(&self, count: usize) -> BigUint {
        self.moduli[..count.min(self.moduli.len())]
            .iter()
            .fold(BigUint::from(1u32), |acc, &q| acc * q)
    }

    /// Forward-transform per-limb coefficient vectors (limb i reduced mod q_i).
    pub fn poly_from_coeff_limbs(&self, limbs: Vec<Vec<u64>>) -> Result<RnsPoly> {
        self.check_count(limbs.len())?;
        let components = limbs
            .into_par_iter()
            .zip(self.plans.par_iter())
            .map(|(coeffs, plan)| NttPoly::from_coeffs(coeffs, plan.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(RnsPoly {
            components,
            ring_degree: self.ring_degree,
        })
    }

    /// Lift a small signed polynomial (noise, ternary secret) into the first `count` moduli.
    pub fn poly_from_signed(&self, values: &[i64], count: usize) -> Result<RnsPoly> {
        self.check_count(count)?;
        if values.len() != self.ring_degree {
            return Err(HeError::DimensionMismatch {
                expected: self.ring_degree,
                got: values.len(),
            });
        }
        let limbs = self.moduli[..count]
            .iter()
            .map(|&q| values.iter().map(|&v| reduce_i64(v, q)).collect())
            .collect();
        self.poly_from_coeff_limbs(limbs)
    }

    /// Reduce arbitrary-precision signed coefficients into the first `count` moduli.
    pub fn poly_from_bigints(&self, values: &[BigInt], count: usize) -> Result<RnsPoly> {
        self.check_count(count)?;
        if values.len() != self.ring_degree {
            return Err(HeError::DimensionMismatch {
                expected: self.ring_degree,
                got: values.len(),
            });
        }
        let limbs = self.moduli[..count]
            .iter()
            .map(|&q| values.iter().map(|v| bigint_residue(v, q)).collect())
            .collect();
        self.poly_from_coeff_limbs(limbs)
    }
}

/// v mod q in [0, q).
pub fn bigint_residue(v: &BigInt, q: u64) -> u64 {
    let r = (v.magnitude() % q).to_u64().unwrap_or(0);
    if v.sign() == Sign::Minus && r != 0 {
        q - r
    } else {
        r
    }
}

/// Polynomial in RNS representation, one NTT-domain component per modulus.
#[derive(Clone, Debug)]
pub struct RnsPoly {
    pub components: Vec<NttPoly>,
    pub ring_degree: usize,
}

impl RnsPoly {
    /// Level in the Q chain (components − 1).
    pub fn level(&self) -> usize {
        self.components.len().saturating_sub(1)
    }

    pub fn moduli(&self) -> Vec<u64> {
        self.components.iter().map(|c| c.modulus).collect()
    }

    fn check(&self, other: &Self) -> Result<()> {
        if self.components.len() != other.components.len() {
            return Err(HeError::LevelMismatch {
                expected: self.level(),
                got: other.level(),
            });
        }
        Ok(())
    }

    /// Inverse NTT of every component.
    pub fn to_coeff_limbs(&self) -> Vec<Vec<u64>> {
        self.components.par_iter().map(|c| c.to_coeffs()).collect()
    }

    /// CRT-reconstruct every coefficient as a centered integer in (-Q/2, Q/2].
    pub fn to_bigints_centered(&self) -> Vec<BigInt> {
        let moduli = self.moduli();
        let limbs = self.to_coeff_limbs();
        if moduli.len() == 1 {
            let q = moduli[0];
            return limbs[0].iter().map(|&c| BigInt::from(center(c, q))).collect();
        }

        let big_q = moduli.iter().fold(BigUint::from(1u32), |acc, &q| acc * q);
        let half_q = &big_q >> 1;
        let crt: Vec<(u64, BigUint)> = moduli
            .iter()
            .map(|&q| {
                let hat = &big_q / q;
                let hat_mod = (&hat % q).to_u64().unwrap_or(0);
                (mod_inv(hat_mod, q).unwrap_or(0), hat)
            })
            .collect();

        (0..self.ring_degree)
            .map(|x| {
                let mut acc = BigUint::zero();
                for (i, &q) in moduli.iter().enumerate() {
                    let (hat_inv, hat) = &crt[i];
                    let y = mod_mul(limbs[i][x], *hat_inv, q, barrett_constant(q));
                    acc += hat * y;
                }
                acc %= &big_q;
                if acc > half_q {
                    -BigInt::from(&big_q - acc)
                } else {
                    BigInt::from(acc)
                }
            })
            .collect()
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.sub_assign(other)?;
        Ok(out)
    }

    pub fn neg(&self) -> Self {
        let mut out = self.clone();
        out.neg_assign();
        out
    }

    /// Polynomial product (pointwise in every limb).
    pub fn mul(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.mul_assign(other)?;
        Ok(out)
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        for (a, b) in self.components.iter_mut().zip(other.components.iter()) {
            a.add_assign(b)?;
        }
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        for (a, b) in self.components.iter_mut().zip(other.components.iter()) {
            a.sub_assign(b)?;
        }
        Ok(())
    }

    pub fn neg_assign(&mut self) {
        for a in self.components.iter_mut() {
            a.neg_assign();
        }
    }

    pub fn mul_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        self.components
            .par_iter_mut()
            .zip(other.components.par_iter())
            .try_for_each(|(a, b)| a.mul_assign(b))
    }

    /// Multiply by a small integer (same value in every limb).
    pub fn scalar_mul(&self, scalar: u64) -> Self {
        let mut out = self.clone();
        for c in out.components.iter_mut() {
            c.scalar_mul_assign(scalar);
        }
        out
    }

    /// Multiply limb i by `residues[i]`.
    pub fn mul_rns_scalar_assign(&mut self, residues: &[u64]) -> Result<()> {
        if residues.len() < self.components.len() {
            return Err(HeError::DimensionMismatch {
                expected: self.components.len(),
                got: residues.len(),
            });
        }
        for (c, &r) in self.components.iter_mut().zip(residues) {
            c.scalar_mul_assign(r);
        }
        Ok(())
    }

    /// Add the constant polynomial with residues `residues[i]`.
    ///
    /// A constant is the same value at every evaluation point, so this is a
    /// plain per-limb addition in the NTT domain.
    pub fn add_rns_scalar_assign(&mut self, residues: &[u64]) -> Result<()> {
        if residues.len() < self.components.len() {
            return Err(HeError::DimensionMismatch {
                expected: self.components.len(),
                got: residues.len(),
            });
        }
        for (c, &r) in self.components.iter_mut().zip(residues) {
            let q = c.modulus;
            let r = r % q;
            for e in c.evals.iter_mut() {
                *e = mod_add(*e, r, q);
            }
        }
        Ok(())
    }

    /// self += a ⊙ b_mont, limb by limb. `b_mont` may carry more limbs than
    /// `self` (a key stored at the top level); only the matching prefix is used.
    pub fn mul_montgomery_add_assign(&mut self, a: &Self, b_mont: &Self) -> Result<()> {
        self.check(a)?;
        if b_mont.components.len() < self.components.len() {
            return Err(HeError::LevelMismatch {
                expected: self.level(),
                got: b_mont.level(),
            });
        }
        self.components
            .par_iter_mut()
            .zip(a.components.par_iter())
            .zip(b_mont.components.par_iter())
            .try_for_each(|((acc, x), y)| acc.mul_montgomery_add_assign(x, y))
    }

    /// Convert every evaluation to Montgomery form.
    pub fn mform_assign(&mut self) {
        for c in self.components.iter_mut() {
            let q = c.modulus;
            for e in c.evals.iter_mut() {
                *e = to_montgomery(*e, q);
            }
        }
    }

    /// Apply an NTT-domain index permutation to every limb.
    pub fn permute(&self, table: &[usize]) -> Self {
        Self {
            components: self.components.iter().map(|c| c.permute(table)).collect(),
            ring_degree: self.ring_degree,
        }
    }

    /// Keep only the first `count` limbs.
    pub fn truncate(&mut self, count: usize) {
        self.components.truncate(count);
    }

    /// Copy of the first `count` limbs.
    pub fn prefix(&self, count: usize) -> Self {
        Self {
            components: self.components[..count.min(self.components.len())].to_vec(),
            ring_degree: self.ring_degree,
        }
    }

    /// Divide by the last modulus q_l with rounding and drop that limb.
    pub fn rescale_assign(&mut self) -> Result<()> {
        if self.components.len() < 2 {
            return Err(HeError::LevelUnderflow {
                level: self.level(),
                needed: 1,
            });
        }
        let last = self.components.pop().ok_or(HeError::LevelUnderflow { level: 0, needed: 1 })?;
        let q_last = last.modulus;
        let centered: Vec<i64> = last.to_coeffs().iter().map(|&c| center(c, q_last)).collect();

        self.components.par_iter_mut().try_for_each(|comp| -> Result<()> {
            let q = comp.modulus;
            let r = NttPoly::from_coeffs(
                centered.iter().map(|&v| reduce_i64(v, q)).collect(),
                comp.plan.clone(),
            )?;
            let q_last_inv = mod_inv(q_last % q, q).ok_or(HeError::ModulusMismatch)?;
            comp.sub_assign(&r)?;
            comp.scalar_mul_assign(q_last_inv);
            Ok(())
        })
    }

    pub fn is_zero(&self) -> bool {
        self.components.iter().all(|c| c.is_zero())
    }
}

impl PartialEq for RnsPoly {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

/// Polynomial over Q_l ∪ P, the extended basis used during key switching.
#[derive(Clone, Debug, PartialEq)]
pub struct QpPoly {
    pub q: RnsPoly,
    pub p: RnsPoly,
}

impl QpPoly {
    pub fn zero(ring_q: &RnsBasis, ring_p: &RnsBasis, level: usize) -> Self {
        Self {
            q: ring_q.zero(level + 1),
            p: ring_p.zero(ring_p.num_moduli()),
        }
    }

    pub fn from_signed(ring_q: &RnsBasis, ring_p: &RnsBasis, values: &[i64], level: usize) -> Result<Self> {
        Ok(Self {
            q: ring_q.poly_from_signed(values, level + 1)?,
            p: ring_p.poly_from_signed(values, ring_p.num_moduli())?,
        })
    }

    pub fn level(&self) -> usize {
        self.q.level()
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.q.add_assign(&other.q)?;
        self.p.add_assign(&other.p)
    }

    pub fn sub_assign(&mut self, other: &Self) -> Result<()> {
        self.q.sub_assign(&other.q)?;
        self.p.sub_assign(&other.p)
    }

    pub fn neg_assign(&mut self) {
        self.q.neg_assign();
        self.p.neg_assign();
    }

    pub fn mul_assign(&mut self, other: &Self) -> Result<()> {
        self.q.mul_assign(&other.q)?;
        self.p.mul_assign(&other.p)
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn mul(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.mul_assign(other)?;
        Ok(out)
    }

    pub fn mul_montgomery_add_assign(&mut self, a: &Self, b_mont: &Self) -> Result<()> {
        self.q.mul_montgomery_add_assign(&a.q, &b_mont.q)?;
        self.p.mul_montgomery_add_assign(&a.p, &b_mont.p)
    }

    pub fn mform_assign(&mut self) {
        self.q.mform_assign();
        self.p.mform_assign();
    }

    pub fn permute(&self, table: &[usize]) -> Self {
        Self {
            q: self.q.permute(table),
            p: self.p.permute(table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::primes::generate_ntt_primes;
    use crate::ring::poly::CoeffPoly;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    const N: usize = 64;

    fn basis(count: usize) -> RnsBasis {
        RnsBasis::new(generate_ntt_primes(50, count, N, &[]).unwrap(), N).unwrap()
    }

    #[test]
    fn test_signed_roundtrip_through_crt() {
        let b = basis(3);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let values: Vec<i64> = (0..N).map(|_| rng.random_range(-1000..1000)).collect();
        let p = b.poly_from_signed(&values, 3).unwrap();
        assert_eq!(p.level(), 2);
        let back: Vec<i64> = p.to_bigints_centered().iter().map(|v| v.to_i64().unwrap()).collect();
        assert_eq!(back, values);
    }

    #[test]
    fn test_bigint_lift_matches_signed_lift() {
        let b = basis(2);
        let values: Vec<i64> = (0..N as i64).map(|i| i * i - 700).collect();
        let big: Vec<BigInt> = values.iter().map(|&v| BigInt::from(v)).collect();
        assert_eq!(b.poly_from_bigints(&big, 2).unwrap(), b.poly_from_signed(&values, 2).unwrap());
        assert_eq!(bigint_residue(&BigInt::from(-3), 17), 14);
    }

    #[test]
    fn test_mul_matches_naive_per_limb() {
        let b = basis(2);
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let x: Vec<i64> = (0..N).map(|_| rng.random_range(-5..5)).collect();
        let y: Vec<i64> = (0..N).map(|_| rng.random_range(-5..5)).collect();
        let prod = b.poly_from_signed(&x, 2).unwrap().mul(&b.poly_from_signed(&y, 2).unwrap()).unwrap();
        for (i, &q) in b.moduli.iter().enumerate() {
            let naive = CoeffPoly::from_signed(&x, q).mul_naive(&CoeffPoly::from_signed(&y, q)).unwrap();
            assert_eq!(prod.components[i].to_coeff_poly(), naive);
        }
    }

    #[test]
    fn test_level_mismatch_is_rejected() {
        let b = basis(3);
        let mut a = b.zero(3);
        let before = a.clone();
        assert!(matches!(a.add_assign(&b.zero(2)), Err(HeError::LevelMismatch { .. })));
        assert_eq!(a, before);
    }

    #[test]
    fn test_rescale_rounds_division() {
        let b = basis(3);
        let q_last = b.moduli[2] as i128;
        // 5·q_last + 3 and -(7·q_last) + q_last/2 - 1 both round to 5 and -7.
        let values = [BigInt::from(5 * q_last + 3), BigInt::from(-7 * q_last + q_last / 2 - 1)];
        let mut coeffs = vec![BigInt::zero(); N];
        coeffs[0] = values[0].clone();
        coeffs[1] = values[1].clone();
        let mut p = b.poly_from_bigints(&coeffs, 3).unwrap();
        p.rescale_assign().unwrap();
        assert_eq!(p.level(), 1);
        let out = p.to_bigints_centered();
        assert_eq!(out[0], BigInt::from(5));
        assert_eq!(out[1], BigInt::from(-7));
        assert!(out[2..].iter().all(|v| v.is_zero()));

        let mut bottom = b.zero(1);
        assert!(matches!(bottom.rescale_assign(), Err(HeError::LevelUnderflow { .. })));
    }

    #[test]
    fn test_constant_add_and_montgomery() {
        let b = basis(2);
        let mut p = b.zero(2);
        p.add_rns_scalar_assign(&[3, 3]).unwrap();
        let coeffs = p.to_bigints_centered();
        assert_eq!(coeffs[0], BigInt::from(3));
        assert!(coeffs[1..].iter().all(|v| v.is_zero()));

        let mut two = b.zero(2);
        two.add_rns_scalar_assign(&[2, 2]).unwrap();
        let mut two_mont = two.clone();
        two_mont.mform_assign();
        let mut acc = b.zero(2);
        acc.mul_montgomery_add_assign(&p, &two_mont).unwrap();
        assert_eq!(acc, p.scalar_mul(2));
    }
}
