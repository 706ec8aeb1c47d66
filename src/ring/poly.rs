use crate::error::{HeError, Result};
use crate::ring::modular::{barrett_constant, center, mod_add, mod_mul, mod_neg, mod_sub, reduce_i64};

/// Polynomial in coefficient representation over Z_q[X]/(X^n + 1).
#[derive(Clone, Debug)]
pub struct CoeffPoly {
    pub coeffs: Vec<u64>,
    pub modulus: u64,
}

impl CoeffPoly {
    /// Create a zero polynomial of degree < n in Z_q.
    pub fn zero(n: usize, modulus: u64) -> Self {
        Self {
            coeffs: vec![0u64; n],
            modulus,
        }
    }

    /// Create a polynomial from coefficients (reduced mod q).
    pub fn from_coeffs(coeffs: Vec<u64>, modulus: u64) -> Self {
        let mut p = Self { coeffs, modulus };
        p.reduce();
        p
    }

    /// Lift small signed coefficients into Z_q.
    pub fn from_signed(values: &[i64], modulus: u64) -> Self {
        Self {
            coeffs: values.iter().map(|&v| reduce_i64(v, modulus)).collect(),
            modulus,
        }
    }

    /// Ring degree (number of coefficients).
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// Reduce all coefficients mod q.
    pub fn reduce(&mut self) {
        for c in self.coeffs.iter_mut() {
            *c %= self.modulus;
        }
    }

    fn check(&self, other: &Self) -> Result<()> {
        if self.len() != other.len() {
            return Err(HeError::DimensionMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        if self.modulus != other.modulus {
            return Err(HeError::ModulusMismatch);
        }
        Ok(())
    }

    pub fn add(&self, other: &Self) -> Result<Self> {
        self.check(other)?;
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(&a, &b)| mod_add(a, b, self.modulus))
            .collect();
        Ok(Self { coeffs, modulus: self.modulus })
    }

    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.check(other)?;
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(&a, &b)| mod_sub(a, b, self.modulus))
            .collect();
        Ok(Self { coeffs, modulus: self.modulus })
    }

    pub fn neg(&self) -> Self {
        let coeffs = self.coeffs.iter().map(|&a| mod_neg(a, self.modulus)).collect();
        Self { coeffs, modulus: self.modulus }
    }

    /// Schoolbook product in Z_q[X]/(X^n+1). Reference for the NTT path.
    pub fn mul_naive(&self, other: &Self) -> Result<Self> {
        self.check(other)?;
        let n = self.len();
        let q = self.modulus;
        let bk = barrett_constant(q);
        let mut result = vec![0u64; n];

        for (i, &a) in self.coeffs.iter().enumerate() {
            if a == 0 {
                continue;
            }
            for (j, &b) in other.coeffs.iter().enumerate() {
                let prod = mod_mul(a, b, q, bk);
                let idx = i + j;
                if idx < n {
                    result[idx] = mod_add(result[idx], prod, q);
                } else {
                    // X^n = -1
                    result[idx - n] = mod_sub(result[idx - n], prod, q);
                }
            }
        }

        Ok(Self { coeffs: result, modulus: q })
    }

    pub fn scalar_mul(&self, scalar: u64) -> Self {
        let bk = barrett_constant(self.modulus);
        let s = scalar % self.modulus;
        let coeffs = self
            .coeffs
            .iter()
            .map(|&c| mod_mul(c, s, self.modulus, bk))
            .collect();
        Self { coeffs, modulus: self.modulus }
    }

    /// Apply X -> X^g for odd g; coefficient i moves to i·g mod 2n with a
    /// sign flip when it lands in [n, 2n).
    pub fn automorphism(&self, g: usize) -> Self {
        let n = self.len();
        let two_n = 2 * n;
        let mut out = vec![0u64; n];
        for (i, &c) in self.coeffs.iter().enumerate() {
            let j = (i * g) % two_n;
            if j < n {
                out[j] = c;
            } else {
                out[j - n] = mod_neg(c, self.modulus);
            }
        }
        Self { coeffs: out, modulus: self.modulus }
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    /// Centered representatives in (-q/2, q/2].
    pub fn centered_coeffs(&self) -> Vec<i64> {
        self.coeffs.iter().map(|&c| center(c, self.modulus)).collect()
    }

    /// Largest centered coefficient magnitude.
    pub fn inf_norm(&self) -> u64 {
        self.centered_coeffs()
            .iter()
            .map(|c| c.unsigned_abs())
            .max()
            .unwrap_or(0)
    }
}

impl PartialEq for CoeffPoly {
    fn eq(&self, other: &Self) -> bool {
        self.modulus == other.modulus && self.coeffs == other.coeffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub_neg() {
        let a = CoeffPoly::from_coeffs(vec![1, 2, 3, 4], 17);
        let b = CoeffPoly::from_coeffs(vec![5, 6, 7, 8], 17);
        let c = a.add(&b).unwrap();
        assert_eq!(c.coeffs, vec![6, 8, 10, 12]);
        assert_eq!(c.sub(&b).unwrap(), a);
        assert!(a.add(&a.neg()).unwrap().is_zero());
        assert!(a.add(&CoeffPoly::zero(8, 17)).is_err());
        assert!(a.add(&CoeffPoly::zero(4, 19)).is_err());
    }

    #[test]
    fn test_mul_naive_wraparound() {
        // X^3 · X^3 = -X^2 in Z_17[X]/(X^4+1)
        let a = CoeffPoly::from_coeffs(vec![0, 0, 0, 1], 17);
        assert_eq!(a.mul_naive(&a).unwrap().coeffs, vec![0, 0, 16, 0]);
        let b = CoeffPoly::from_coeffs(vec![1, 1, 0, 0], 17);
        assert_eq!(b.mul_naive(&b).unwrap().coeffs, vec![1, 2, 1, 0]);
    }

    #[test]
    fn test_signed_and_centered() {
        let a = CoeffPoly::from_signed(&[0, 1, -1, -8], 17);
        assert_eq!(a.coeffs, vec![0, 1, 16, 9]);
        assert_eq!(a.centered_coeffs(), vec![0, 1, -1, -8]);
        assert_eq!(a.inf_norm(), 8);
        assert_eq!(a.scalar_mul(2).centered_coeffs(), vec![0, 2, -2, 1]);
    }

    #[test]
    fn test_automorphism() {
        // X -> X^3 on Z_17[X]/(X^4+1): X^2 -> X^6 = -X^2, X^3 -> X^9 = X
        let a = CoeffPoly::from_coeffs(vec![0, 0, 1, 1], 17);
        assert_eq!(a.automorphism(3).coeffs, vec![0, 1, 16, 0]);
        // g = 2n - 1 composed with itself is the identity
        let b = CoeffPoly::from_coeffs(vec![3, 5, 7, 11], 17);
        assert_eq!(b.automorphism(7).automorphism(7), b);
    }
}
