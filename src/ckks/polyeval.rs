//! Polynomial functions of a ciphertext built from the basic operators.
//!
//! Polynomials are evaluated with a baby-step giant-step split. Every node of
//! the split tree is computed at a level and scale fixed in advance, so the
//! final result lands exactly on the requested scale.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::{debug, instrument};

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::eval::Evaluator;
use crate::error::{HeError, Result};

/// Chebyshev interpolant of a real function on [a, b].
#[derive(Clone, Debug, PartialEq)]
pub struct ChebyshevApprox {
    pub coeffs: Vec<f64>,
    pub a: f64,
    pub b: f64,
}

impl ChebyshevApprox {
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Plain evaluation (Clenshaw) for reference.
    pub fn evaluate(&self, x: f64) -> f64 {
        let y = (2.0 * x - self.a - self.b) / (self.b - self.a);
        let (mut b1, mut b2) = (0.0, 0.0);
        for &c in self.coeffs.iter().skip(1).rev() {
            let b0 = 2.0 * y * b1 - b2 + c;
            b2 = b1;
            b1 = b0;
        }
        y * b1 - b2 + self.coeffs.first().copied().unwrap_or(0.0)
    }
}

pub mod chebyshev {
    use super::*;

    /// Interpolate `f` at the degree + 1 Chebyshev nodes of [a, b].
    pub fn approximate<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, degree: usize) -> Result<ChebyshevApprox> {
        if !(a < b) {
            return Err(HeError::ParameterInvalid(format!("empty interval [{a}, {b}]")));
        }
        let n = degree + 1;
        let values: Vec<f64> = (0..n)
            .map(|k| {
                let node = (PI * (k as f64 + 0.5) / n as f64).cos();
                f(0.5 * (b - a) * node + 0.5 * (a + b))
            })
            .collect();
        let mut coeffs: Vec<f64> = (0..n)
            .map(|j| {
                let sum: f64 = values
                    .iter()
                    .enumerate()
                    .map(|(k, y)| y * (PI * j as f64 * (k as f64 + 0.5) / n as f64).cos())
                    .sum();
                2.0 * sum / n as f64
            })
            .collect();
        coeffs[0] /= 2.0;
        Ok(ChebyshevApprox { coeffs, a, b })
    }
}

/// Split tree of a polynomial over the giant steps.
enum Node {
    Leaf(Vec<Complex64>),
    Split { giant: usize, low: Box<Node>, high: Box<Node> },
}

fn split(coeffs: Vec<Complex64>, baby: usize, giants: &[usize], chebyshev: bool) -> Node {
    let degree = coeffs.len() - 1;
    let Some(&giant) = giants.iter().rev().find(|&&g| g <= degree) else {
        return Node::Leaf(coeffs);
    };
    if degree < baby {
        return Node::Leaf(coeffs);
    }
    let mut low = coeffs[..giant].to_vec();
    let high = if chebyshev {
        // T_g·T_i = (T_{g+i} + T_{g-i}) / 2
        let mut high = Vec::with_capacity(degree - giant + 1);
        high.push(coeffs[giant]);
        for i in 1..=degree - giant {
            high.push(coeffs[giant + i] * 2.0);
            low[giant - i] -= coeffs[giant + i];
        }
        high
    } else {
        coeffs[giant..].to_vec()
    };
    Node::Split {
        giant,
        low: Box::new(split(low, baby, giants, chebyshev)),
        high: Box::new(split(high, baby, giants, chebyshev)),
    }
}

/// x^i or T_i(x) for the exponents the split tree touches.
struct PowerBasis {
    powers: BTreeMap<usize, Ciphertext>,
    chebyshev: bool,
}

impl PowerBasis {
    fn new(x: Ciphertext, chebyshev: bool) -> Self {
        let mut powers = BTreeMap::new();
        powers.insert(1, x);
        Self { powers, chebyshev }
    }

    fn get(&self, n: usize) -> Result<&Ciphertext> {
        self.powers
            .get(&n)
            .ok_or_else(|| HeError::ParameterInvalid(format!("power {n} was not generated")))
    }

    /// x^n = x^a·x^b, or T_n = 2·T_a·T_b − T_{a−b}, with a the largest power
    /// of two below n.
    fn generate(&mut self, eval: &Evaluator, n: usize) -> Result<()> {
        if n == 0 || self.powers.contains_key(&n) {
            return Ok(());
        }
        let a = if n.is_power_of_two() { n / 2 } else { 1 << n.ilog2() };
        let b = n - a;
        self.generate(eval, a)?;
        self.generate(eval, b)?;
        if self.chebyshev {
            self.generate(eval, a - b)?;
        }

        let mut x = self.get(a)?.clone();
        let mut y = self.get(b)?.clone();
        eval.align_levels(&mut x, &mut y)?;
        eval.mul_relin(&mut x, &y, true)?;
        if self.chebyshev {
            eval.mult_by_const(&mut x, Complex64::new(2.0, 0.0))?;
            if a == b {
                eval.add_const(&mut x, Complex64::new(-1.0, 0.0))?;
            } else {
                let mut t = self.get(a - b)?.clone();
                let gap = t.level() - x.level();
                eval.drop_level(&mut t, gap)?;
                let factor = (x.scale / t.scale).round();
                eval.mul_integer(&mut t, factor)?;
                t.scale = x.scale;
                eval.sub(&mut x, &t)?;
            }
        }
        eval.rescale(&mut x)?;
        self.powers.insert(n, x);
        Ok(())
    }
}

/// Highest level at which `node` can be produced, or `None` if no level works.
fn max_level(node: &Node, basis: &PowerBasis) -> Result<Option<usize>> {
    match node {
        Node::Leaf(coeffs) => {
            let mut level = usize::MAX;
            for (i, c) in coeffs.iter().enumerate().skip(1) {
                if *c != Complex64::new(0.0, 0.0) {
                    level = level.min(basis.get(i)?.level());
                }
            }
            Ok(Some(level))
        }
        Node::Split { giant, low, high } => {
            let (Some(l), Some(h)) = (max_level(low, basis)?, max_level(high, basis)?) else {
                return Ok(None);
            };
            if h == 0 {
                return Ok(None);
            }
            Ok(Some(basis.get(*giant)?.level().min(l).min(h - 1)))
        }
    }
}

impl Evaluator {
    /// Drop the higher of two ciphertexts to the level of the other.
    pub(crate) fn align_levels(&self, a: &mut Ciphertext, b: &mut Ciphertext) -> Result<()> {
        let (la, lb) = (a.level(), b.level());
        if la > lb {
            self.drop_level(a, la - lb)
        } else {
            self.drop_level(b, lb - la)
        }
    }

    /// Multiply by round(value); the scale is left to the caller.
    pub(crate) fn mul_integer(&self, dst: &mut Ciphertext, value: f64) -> Result<()> {
        let poly = self.const_poly(Complex64::new(value, 0.0), 1.0, dst.level())?;
        for comp in dst.value.iter_mut() {
            comp.mul_assign(&poly)?;
        }
        Ok(())
    }

    /// Square, relinearize and rescale `log_pow` times: x -> x^(2^log_pow).
    pub fn power_of2(&self, dst: &mut Ciphertext, log_pow: usize) -> Result<()> {
        if dst.level() < log_pow {
            return Err(HeError::LevelUnderflow {
                level: dst.level(),
                needed: log_pow,
            });
        }
        for _ in 0..log_pow {
            let x = dst.clone();
            self.mul_relin(dst, &x, true)?;
            self.rescale(dst)?;
        }
        Ok(())
    }

    /// x^degree by square-and-multiply, rescaling after every product.
    #[instrument(skip_all, fields(degree))]
    pub fn power(&self, ct: &Ciphertext, degree: u64) -> Result<Ciphertext> {
        if degree == 0 {
            return Err(HeError::ParameterInvalid("power of degree 0".into()));
        }
        let mut base = ct.clone();
        let mut acc: Option<Ciphertext> = None;
        let mut e = degree;
        loop {
            if e & 1 == 1 {
                acc = Some(match acc {
                    None => base.clone(),
                    Some(mut a) => {
                        let mut b = base.clone();
                        self.align_levels(&mut a, &mut b)?;
                        self.mul_relin(&mut a, &b, true)?;
                        self.rescale(&mut a)?;
                        a
                    }
                });
            }
            e >>= 1;
            if e == 0 {
                break;
            }
            self.power_of2(&mut base, 1)?;
        }
        acc.ok_or_else(|| HeError::ParameterInvalid("power of degree 0".into()))
    }

    /// 1/x for slots in (0, 2) by Goldschmidt iteration.
    ///
    /// Each of the `steps − 1` iterations squares the error term 1 − x and
    /// costs one level on both the error and the running product.
    #[instrument(skip_all, fields(steps))]
    pub fn inverse(&self, ct: &Ciphertext, steps: usize) -> Result<Ciphertext> {
        let mut cbar = ct.clone();
        self.neg(&mut cbar)?;
        let mut res = cbar.clone();
        self.add_const(&mut cbar, Complex64::new(1.0, 0.0))?;
        self.add_const(&mut res, Complex64::new(2.0, 0.0))?;

        for _ in 1..steps {
            self.power_of2(&mut cbar, 1)?;
            let mut factor = cbar.clone();
            self.add_const(&mut factor, Complex64::new(1.0, 0.0))?;
            self.align_levels(&mut res, &mut factor)?;
            self.mul_relin(&mut res, &factor, true)?;
            self.rescale(&mut res)?;
        }
        Ok(res)
    }

    /// Σ coeffs[i]·x^i, landing on `target_scale`.
    #[instrument(skip_all, fields(degree = coeffs.len().saturating_sub(1)))]
    pub fn evaluate_poly(&self, ct: &Ciphertext, coeffs: &[Complex64], target_scale: f64) -> Result<Ciphertext> {
        self.evaluate_in_basis(ct.clone(), coeffs.to_vec(), target_scale, false)
    }

    /// Evaluate a Chebyshev interpolant, mapping [a, b] onto [-1, 1] first.
    #[instrument(skip_all, fields(degree = approx.degree()))]
    pub fn evaluate_cheby(&self, ct: &Ciphertext, approx: &ChebyshevApprox, target_scale: f64) -> Result<Ciphertext> {
        let mut y = ct.clone();
        let alpha = 2.0 / (approx.b - approx.a);
        let beta = -(approx.a + approx.b) / (approx.b - approx.a);
        if alpha != 1.0 {
            let level = y.level();
            self.mult_by_const(&mut y, Complex64::new(alpha, 0.0))?;
            self.add_const(&mut y, Complex64::new(beta, 0.0))?;
            if y.scale != ct.scale {
                self.rescale(&mut y)?;
            }
            debug!(from = level, to = y.level(), "chebyshev interval mapped");
        } else if beta != 0.0 {
            self.add_const(&mut y, Complex64::new(beta, 0.0))?;
        }
        let coeffs = approx.coeffs.iter().map(|&c| Complex64::new(c, 0.0)).collect();
        self.evaluate_in_basis(y, coeffs, target_scale, true)
    }

    fn evaluate_in_basis(
        &self,
        x: Ciphertext,
        mut coeffs: Vec<Complex64>,
        target_scale: f64,
        chebyshev: bool,
    ) -> Result<Ciphertext> {
        if x.degree() != 1 {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                got: x.degree(),
            });
        }
        while coeffs.len() > 1 && coeffs.last() == Some(&Complex64::new(0.0, 0.0)) {
            coeffs.pop();
        }
        if coeffs.is_empty() {
            return Err(HeError::ParameterInvalid("empty coefficient list".into()));
        }
        let degree = coeffs.len() - 1;
        let input_level = x.level();

        let baby = ((degree + 1) as f64).sqrt().ceil().max(2.0) as usize;
        let baby = baby.next_power_of_two();
        let mut giants = Vec::new();
        let mut g = baby;
        while g <= degree {
            giants.push(g);
            g <<= 1;
        }

        let mut basis = PowerBasis::new(x, chebyshev);
        for i in 2..baby.min(degree + 1) {
            basis.generate(self, i)?;
        }
        for &g in &giants {
            basis.generate(self, g)?;
        }

        let tree = split(coeffs, baby, &giants, chebyshev);
        let level = max_level(&tree, &basis)?.map(|l| l.min(input_level));
        let level = match level {
            Some(l) if l >= 1 => l,
            _ => {
                return Err(HeError::LevelUnderflow {
                    level: input_level,
                    needed: input_level + 1,
                })
            }
        };

        let scale = target_scale * self.params().q_moduli()[level] as f64;
        let mut out = self.evaluate_node(&tree, &basis, level, scale)?;
        self.rescale(&mut out)?;
        out.scale = target_scale;
        debug!(degree, from = input_level, to = out.level(), "polynomial evaluated");
        Ok(out)
    }

    /// Produce `node` at exactly (level, scale), before any rescale.
    fn evaluate_node(&self, node: &Node, basis: &PowerBasis, level: usize, scale: f64) -> Result<Ciphertext> {
        match node {
            Node::Leaf(coeffs) => {
                let mut acc = Ciphertext::zero(self.params(), 1, level, scale);
                for (i, &c) in coeffs.iter().enumerate().skip(1) {
                    if c == Complex64::new(0.0, 0.0) {
                        continue;
                    }
                    let mut term = basis.get(i)?.clone();
                    let gap = term.level() - level;
                    self.drop_level(&mut term, gap)?;
                    let poly = self.const_poly(c, scale / term.scale, level)?;
                    for comp in term.value.iter_mut() {
                        comp.mul_assign(&poly)?;
                    }
                    term.scale = scale;
                    self.add(&mut acc, &term)?;
                }
                self.add_const(&mut acc, coeffs[0])?;
                Ok(acc)
            }
            Node::Split { giant, low, high } => {
                let g = basis.get(*giant)?;
                let q_next = self.params().q_moduli()[level + 1] as f64;
                let mut out = self.evaluate_node(high, basis, level + 1, scale / g.scale * q_next)?;
                self.rescale(&mut out)?;
                let mut giant_ct = g.clone();
                self.drop_level(&mut giant_ct, g.level() - level)?;
                self.mul_relin(&mut out, &giant_ct, true)?;
                out.scale = scale;
                let low = self.evaluate_node(low, basis, level, scale)?;
                self.add(&mut out, &low)?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckks::encoder::Encoder;
    use crate::ckks::encrypt::{decrypt, encrypt_sk_with_rng};
    use crate::ckks::eval::EvaluationKeySet;
    use crate::ckks::keys::{gen_relin_key_with_rng, gen_secret_key_with_rng, SecretKey};
    use crate::params::presets::ckks_test;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn setup(seed: u64) -> (Evaluator, Encoder, SecretKey, ChaCha20Rng) {
        let params = ckks_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let keys = EvaluationKeySet {
            relin: Some(gen_relin_key_with_rng(&sk, &mut rng).unwrap()),
            rotations: None,
        };
        (Evaluator::new(&params, keys).unwrap(), Encoder::new(&params), sk, rng)
    }

    fn encrypt(enc: &Encoder, sk: &SecretKey, v: &[f64], rng: &mut ChaCha20Rng) -> Ciphertext {
        let params = enc.params();
        let pt = enc.encode_real(v, params.max_level(), params.scale).unwrap();
        encrypt_sk_with_rng(&pt, sk, rng).unwrap()
    }

    fn decrypt_real(enc: &Encoder, sk: &SecretKey, ct: &Ciphertext, n: usize) -> Vec<f64> {
        enc.decode_real(&decrypt(ct, sk).unwrap()).unwrap()[..n].to_vec()
    }

    #[test]
    fn test_chebyshev_interpolant_matches_function() {
        let approx = chebyshev::approximate(|x: f64| x.exp(), -2.0, 3.0, 12).unwrap();
        for x in [-2.0, -0.7, 0.0, 1.3, 3.0] {
            assert!((approx.evaluate(x) - x.exp()).abs() < 1e-6, "x = {x}");
        }
        assert!(chebyshev::approximate(|x| x, 1.0, 1.0, 3).is_err());
    }

    #[test]
    fn test_power_of2_and_power() {
        let (eval, enc, sk, mut rng) = setup(41);
        let v: Vec<f64> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
        let ct = encrypt(&enc, &sk, &v, &mut rng);

        let mut sq = ct.clone();
        eval.power_of2(&mut sq, 2).unwrap();
        assert_eq!(sq.level(), ct.level() - 2);
        for (got, x) in decrypt_real(&enc, &sk, &sq, 16).iter().zip(&v) {
            assert!((got - x.powi(4)).abs() < 1e-4);
        }

        let p = eval.power(&ct, 5).unwrap();
        assert_eq!(p.level(), ct.level() - 3);
        for (got, x) in decrypt_real(&enc, &sk, &p, 16).iter().zip(&v) {
            assert!((got - x.powi(5)).abs() < 1e-4);
        }
        assert!(eval.power(&ct, 0).is_err());
    }

    #[test]
    fn test_inverse() {
        let (eval, enc, sk, mut rng) = setup(42);
        let v: Vec<f64> = (0..16).map(|_| rng.random_range(0.5..1.5)).collect();
        let ct = encrypt(&enc, &sk, &v, &mut rng);
        let inv = eval.inverse(&ct, 5).unwrap();
        for (got, x) in decrypt_real(&enc, &sk, &inv, 16).iter().zip(&v) {
            assert!((got - 1.0 / x).abs() < 1e-3, "1/{x}: {got}");
        }
    }

    #[test]
    fn test_evaluate_poly_hits_target_scale() {
        let (eval, enc, sk, mut rng) = setup(43);
        let v: Vec<f64> = (0..16).map(|_| rng.random_range(-1.0..1.0)).collect();
        let ct = encrypt(&enc, &sk, &v, &mut rng);
        let coeffs: Vec<Complex64> = [0.5, -1.0, 0.25, 0.0, 0.125, -0.5, 0.0, 0.75]
            .iter()
            .map(|&c| Complex64::new(c, 0.0))
            .collect();
        let target = enc.params().scale;
        let out = eval.evaluate_poly(&ct, &coeffs, target).unwrap();
        assert_eq!(out.scale, target);
        assert!(out.level() < ct.level());
        for (got, x) in decrypt_real(&enc, &sk, &out, 16).iter().zip(&v) {
            let want: f64 = coeffs.iter().enumerate().map(|(i, c)| c.re * x.powi(i as i32)).sum();
            assert!((got - want).abs() < 1e-4, "p({x}) = {want}, got {got}");
        }

        let constant = eval.evaluate_poly(&ct, &[Complex64::new(3.0, 0.0)], target).unwrap();
        for got in decrypt_real(&enc, &sk, &constant, 16) {
            assert!((got - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_evaluate_cheby() {
        let (eval, enc, sk, mut rng) = setup(44);
        let v: Vec<f64> = (0..16).map(|_| rng.random_range(-4.0..4.0)).collect();
        let ct = encrypt(&enc, &sk, &v, &mut rng);
        let sigmoid = |x: f64| 1.0 / (1.0 + (-x).exp());
        let approx = chebyshev::approximate(sigmoid, -4.0, 4.0, 15).unwrap();
        let out = eval.evaluate_cheby(&ct, &approx, enc.params().scale).unwrap();
        for (got, x) in decrypt_real(&enc, &sk, &out, 16).iter().zip(&v) {
            assert!((got - approx.evaluate(*x)).abs() < 1e-3, "x = {x}");
            assert!((got - sigmoid(*x)).abs() < 1e-2, "x = {x}");
        }
    }

    #[test]
    fn test_depth_exhaustion_fails() {
        let (eval, enc, sk, mut rng) = setup(45);
        let params = enc.params().clone();
        let pt = enc.encode_real(&[0.5], 1, params.scale).unwrap();
        let ct = encrypt_sk_with_rng(&pt, &sk, &mut rng).unwrap();
        let coeffs = vec![Complex64::new(1.0, 0.0); 8];
        assert!(eval.evaluate_poly(&ct, &coeffs, params.scale).is_err());
    }
}
