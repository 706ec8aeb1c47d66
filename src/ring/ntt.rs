use std::collections::HashMap;
use std::sync::Arc;

pub use concrete_ntt::prime64::Plan;

use crate::error::{HeError, Result};
use crate::ring::modular::{
    barrett_constant, mod_add, mod_mul, mod_neg, mod_sub, montgomery_inv_neg, mul_montgomery, mul_shoup,
    shoup_precompute,
};
use crate::ring::poly::CoeffPoly;

/// Polynomial in NTT (evaluation) representation over Z_q[X]/(X^n + 1).
///
/// The transform is `concrete-ntt`'s negacyclic plan; pointwise products and
/// Montgomery accumulation act on its output buffer directly.
#[derive(Clone, Debug)]
pub struct NttPoly {
    pub evals: Vec<u64>,
    pub modulus: u64,
    pub plan: Arc<Plan>,
}

/// Build a shareable NTT plan for (n, q).
pub fn make_plan(n: usize, modulus: u64) -> Result<Arc<Plan>> {
    if !n.is_power_of_two() || n < 16 {
        return Err(HeError::InvalidRingDegree(n));
    }
    let plan = Plan::try_new(n, modulus).ok_or_else(|| {
        HeError::ParameterInvalid(format!(
            "cannot create NTT plan for n={n}, q={modulus} (need prime q ≡ 1 mod {})",
            2 * n
        ))
    })?;
    Ok(Arc::new(plan))
}

/// Evaluation order of `plan.fwd`.
///
/// Output slot k holds p(ω^(order[k])) where ω is the point of slot 0, so
/// `order[0] == 1` and every entry is odd and below 2n. Reading the order off
/// the transform of X keeps the Galois tables independent of the plan's
/// internal layout.
pub fn evaluation_order(plan: &Plan) -> Result<Vec<usize>> {
    let n = plan.ntt_size();
    let q = plan.modulus();
    let mut x = vec![0u64; n];
    x[1] = 1;
    plan.fwd(&mut x);

    let bk = barrett_constant(q);
    let omega = x[0];
    let omega_sq = mod_mul(omega, omega, q, bk);
    let mut exponent_of = HashMap::with_capacity(n);
    let mut pw = omega;
    for e in (1..2 * n).step_by(2) {
        exponent_of.insert(pw, e);
        pw = mod_mul(pw, omega_sq, q, bk);
    }
    x.iter()
        .map(|v| {
            exponent_of.get(v).copied().ok_or_else(|| {
                HeError::ParameterInvalid(format!("NTT plan for q={q} does not evaluate at odd powers of one root"))
            })
        })
        .collect()
}

impl NttPoly {
    /// Zero polynomial in NTT domain.
    pub fn zero(plan: Arc<Plan>) -> Self {
        Self {
            evals: vec![0u64; plan.ntt_size()],
            modulus: plan.modulus(),
            plan,
        }
    }

    /// Forward NTT of a coefficient polynomial.
    pub fn from_coeff_poly(poly: &CoeffPoly, plan: Arc<Plan>) -> Result<Self> {
        if poly.modulus != plan.modulus() {
            return Err(HeError::ModulusMismatch);
        }
        Self::from_coeffs(poly.coeffs.clone(), plan)
    }

    /// Forward NTT of raw coefficients already reduced mod q.
    pub fn from_coeffs(mut coeffs: Vec<u64>, plan: Arc<Plan>) -> Result<Self> {
        if coeffs.len() != plan.ntt_size() {
            return Err(HeError::DimensionMismatch {
                expected: plan.ntt_size(),
                got: coeffs.len(),
            });
        }
        plan.fwd(&mut coeffs);
        Ok(Self {
            evals: coeffs,
            modulus: plan.modulus(),
            plan,
        })
    }

    /// Inverse NTT back to coefficients.
    pub fn to_coeff_poly(&self) -> CoeffPoly {
        CoeffPoly {
            coeffs: self.to_coeffs(),
            modulus: self.modulus,
        }
    }

    pub fn to_coeffs(&self) -> Vec<u64> {
        let mut coeffs = self.evals.clone();
        self.plan.inv(&mut coeffs);
        self.plan.normalize(&mut coeffs);
        coeffs
    }

    /// Ring degree.
    pub fn len(&self) -> usize {
        self.evals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
    }

    fn check(&self, other: &Self) -> Result<()> {
        if self.len() != other.len() || self.modulus != other.modulus {
            return Err(HeError::ModulusMismatch);
        }
        Ok(())
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

    /// Pointwise product (= negacyclic polynomial product).
    pub fn mul(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.mul_assign(other)?;
        Ok(out)
    }

    pub fn scalar_mul(&self, scalar: u64) -> Self {
        let mut out = self.clone();
        out.scalar_mul_assign(scalar);
        out
    }

    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        let q = self.modulus;
        for (a, &b) in self.evals.iter_mut().zip(other.evals.iter()) {
            *a = mod_add(*a, b, q);
        }
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        let q = self.modulus;
        for (a, &b) in self.evals.iter_mut().zip(other.evals.iter()) {
            *a = mod_sub(*a, b, q);
        }
        Ok(())
    }

    pub fn neg_assign(&mut self) {
        let q = self.modulus;
        for a in self.evals.iter_mut() {
            *a = mod_neg(*a, q);
        }
    }

    pub fn mul_assign(&mut self, other: &Self) -> Result<()> {
        self.check(other)?;
        let q = self.modulus;
        let bk = barrett_constant(q);
        for (a, &b) in self.evals.iter_mut().zip(other.evals.iter()) {
            *a = mod_mul(*a, b, q, bk);
        }
        Ok(())
    }

    pub fn scalar_mul_assign(&mut self, scalar: u64) {
        let q = self.modulus;
        let s = scalar % q;
        let ss = shoup_precompute(s, q);
        for a in self.evals.iter_mut() {
            *a = mul_shoup(*a, s, ss, q);
        }
    }

    /// self += a ⊙ b where `b_mont` is in Montgomery form.
    pub fn mul_montgomery_add_assign(&mut self, a: &Self, b_mont: &Self) -> Result<()> {
        self.check(a)?;
        self.check(b_mont)?;
        let q = self.modulus;
        let m_inv_neg = montgomery_inv_neg(q);
        for ((acc, &x), &y) in self.evals.iter_mut().zip(a.evals.iter()).zip(b_mont.evals.iter()) {
            *acc = mod_add(*acc, mul_montgomery(x, y, q, m_inv_neg), q);
        }
        Ok(())
    }

    /// Gather evaluations through an index table: out[k] = self[table[k]].
    pub fn permute(&self, table: &[usize]) -> Self {
        let evals = table.iter().map(|&t| self.evals[t]).collect();
        Self {
            evals,
            modulus: self.modulus,
            plan: self.plan.clone(),
        }
    }

    /// Check if zero.
    pub fn is_zero(&self) -> bool {
        self.evals.iter().all(|&e| e == 0)
    }
}

impl PartialEq for NttPoly {
    fn eq(&self, other: &Self) -> bool {
        self.modulus == other.modulus && self.evals == other.evals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::modular::to_montgomery;
    use crate::sampling::sample_uniform_poly;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    // 7681 ≡ 1 mod 512
    const SMALL_Q: u64 = 7681;
    const BIG_Q: u64 = 1152921504606584833;

    #[test]
    fn test_plan_rejects_bad_moduli() {
        assert!(make_plan(16, 65539).is_err()); // prime, but not ≡ 1 mod 32
        assert!(matches!(make_plan(12, SMALL_Q), Err(HeError::InvalidRingDegree(12))));
        assert!(matches!(make_plan(8, SMALL_Q), Err(HeError::InvalidRingDegree(8))));
    }

    #[test]
    fn test_ntt_roundtrip() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        for &(n, q) in &[(16usize, SMALL_Q), (256, SMALL_Q), (1024, BIG_Q)] {
            let plan = make_plan(n, q).unwrap();
            let original = sample_uniform_poly(n, q, &mut rng);
            let ntt = NttPoly::from_coeff_poly(&original, plan).unwrap();
            assert_eq!(ntt.to_coeff_poly(), original);
        }
    }

    #[test]
    fn test_ntt_mul_matches_naive() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for &(n, q) in &[(16usize, SMALL_Q), (64, BIG_Q)] {
            let plan = make_plan(n, q).unwrap();
            let a = sample_uniform_poly(n, q, &mut rng);
            let b = sample_uniform_poly(n, q, &mut rng);
            let naive = a.mul_naive(&b).unwrap();

            let a_ntt = NttPoly::from_coeff_poly(&a, plan.clone()).unwrap();
            let b_ntt = NttPoly::from_coeff_poly(&b, plan).unwrap();
            assert_eq!(a_ntt.mul(&b_ntt).unwrap().to_coeff_poly(), naive);
        }
    }

    #[test]
    fn test_evaluation_order_covers_odd_exponents() {
        for &(n, q) in &[(32usize, SMALL_Q), (1024, BIG_Q)] {
            let plan = make_plan(n, q).unwrap();
            let order = evaluation_order(&plan).unwrap();
            assert_eq!(order[0], 1);
            let mut sorted = order.clone();
            sorted.sort_unstable();
            let odd: Vec<usize> = (1..2 * n).step_by(2).collect();
            assert_eq!(sorted, odd);

            // slot k of fwd(X^2) is the square of slot k of fwd(X)
            let mut x = vec![0u64; n];
            x[1] = 1;
            plan.fwd(&mut x);
            let mut x2 = vec![0u64; n];
            x2[2] = 1;
            plan.fwd(&mut x2);
            let bk = barrett_constant(q);
            for (a, b) in x.iter().zip(&x2) {
                assert_eq!(mod_mul(*a, *a, q, bk), *b);
            }
        }
    }

    #[test]
    fn test_montgomery_accumulate() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let plan = make_plan(64, BIG_Q).unwrap();
        let a = NttPoly::from_coeff_poly(&sample_uniform_poly(64, BIG_Q, &mut rng), plan.clone()).unwrap();
        let b = NttPoly::from_coeff_poly(&sample_uniform_poly(64, BIG_Q, &mut rng), plan.clone()).unwrap();
        let mut b_mont = b.clone();
        for x in b_mont.evals.iter_mut() {
            *x = to_montgomery(*x, BIG_Q);
        }
        let mut acc = NttPoly::zero(plan);
        acc.mul_montgomery_add_assign(&a, &b_mont).unwrap();
        acc.mul_montgomery_add_assign(&a, &b_mont).unwrap();
        let expected = a.mul(&b).unwrap().scalar_mul(2);
        assert_eq!(acc, expected);
    }
}
