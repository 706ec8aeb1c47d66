use std::slice;
use std::sync::Arc;

use crate::ckks::plaintext::Plaintext;
use crate::error::Result;
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Ciphertext (c_0, ..., c_d) decrypting to Σ c_i·s^i.
///
/// Degree is 1 for a fresh ciphertext and 2 between a tensor product and its
/// relinearization. Every component lives over the same Q_level.
#[derive(Clone, Debug)]
pub struct Ciphertext {
    pub value: Vec<RnsPoly>,
    pub scale: f64,
    pub params: Arc<CkksParams>,
}

impl Ciphertext {
    /// All-zero ciphertext of the given degree and level.
    pub fn zero(params: &Arc<CkksParams>, degree: usize, level: usize, scale: f64) -> Self {
        Self {
            value: (0..=degree).map(|_| params.ring_q.zero(level + 1)).collect(),
            scale,
            params: params.clone(),
        }
    }

    pub fn degree(&self) -> usize {
        self.value.len().saturating_sub(1)
    }

    pub fn level(&self) -> usize {
        self.value.first().map_or(0, |c| c.level())
    }

    /// Run an in-place operator on a copy and return the copy; `self` is left
    /// untouched.
    ///
    /// ```no_run
    /// # use mkckks::prelude::*;
    /// # fn demo(eval: &Evaluator, a: &Ciphertext, b: &Ciphertext) -> mkckks::error::Result<()> {
    /// let sum = a.fresh(|c| eval.add(c, b))?;
    /// # Ok(()) }
    /// ```
    pub fn fresh<F>(&self, op: F) -> Result<Ciphertext>
    where
        F: FnOnce(&mut Ciphertext) -> Result<()>,
    {
        let mut out = self.clone();
        op(&mut out)?;
        Ok(out)
    }
}

impl PartialEq for Ciphertext {
    fn eq(&self, other: &Self) -> bool {
        self.scale == other.scale && self.value == other.value
    }
}

/// Right-hand side of a binary operator: a ciphertext or a plaintext.
pub trait Operand {
    fn polys(&self) -> &[RnsPoly];
    fn scale(&self) -> f64;

    fn level(&self) -> usize {
        self.polys().first().map_or(0, |c| c.level())
    }

    fn degree(&self) -> usize {
        self.polys().len().saturating_sub(1)
    }
}

impl Operand for Ciphertext {
    fn polys(&self) -> &[RnsPoly] {
        &self.value
    }

    fn scale(&self) -> f64 {
        self.scale
    }
}

impl Operand for Plaintext {
    fn polys(&self) -> &[RnsPoly] {
        slice::from_ref(&self.value)
    }

    fn scale(&self) -> f64 {
        self.scale
    }
}
