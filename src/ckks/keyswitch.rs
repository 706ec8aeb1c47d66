use tracing::instrument;

use crate::ckks::keys::SwitchingKey;
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::rns::{QpPoly, RnsPoly};

/// Σ_j digits[j]·key[j] over Q_l ∪ P, with `key` in Montgomery form.
///
/// Digits and key agree on the P part; the key's Q part may be longer than
/// the digits' and is read as a prefix.
pub(crate) fn dot(params: &CkksParams, digits: &[QpPoly], key: &[QpPoly]) -> Result<QpPoly> {
    if key.len() < digits.len() {
        return Err(HeError::DimensionMismatch {
            expected: digits.len(),
            got: key.len(),
        });
    }
    let level = digits.first().map_or(0, |d| d.level());
    let mut acc = QpPoly::zero(&params.ring_q, &params.ring_p, level);
    for (d, k) in digits.iter().zip(key) {
        acc.mul_montgomery_add_assign(d, k)?;
    }
    Ok(acc)
}

/// Inner product of lifted digits with a switching key, left over Q_l ∪ P.
///
/// Returns (Σ d_j·k0_j, Σ d_j·k1_j) in one pass over the digits.
pub(crate) fn inner_product(params: &CkksParams, digits: &[QpPoly], key: &SwitchingKey) -> Result<[QpPoly; 2]> {
    if key.value.len() < digits.len() {
        return Err(HeError::DimensionMismatch {
            expected: digits.len(),
            got: key.value.len(),
        });
    }
    let level = digits.first().map_or(0, |d| d.level());
    let mut acc0 = QpPoly::zero(&params.ring_q, &params.ring_p, level);
    let mut acc1 = QpPoly::zero(&params.ring_q, &params.ring_p, level);
    for (d, [k0, k1]) in digits.iter().zip(&key.value) {
        acc0.mul_montgomery_add_assign(d, k0)?;
        acc1.mul_montgomery_add_assign(d, k1)?;
    }
    Ok([acc0, acc1])
}

/// Key-switch already decomposed digits and bring the pair back to Q_l.
pub(crate) fn switch_digits(params: &CkksParams, digits: &[QpPoly], key: &SwitchingKey) -> Result<(RnsPoly, RnsPoly)> {
    let [acc0, acc1] = inner_product(params, digits, key)?;
    let ext = &params.extender;
    Ok((ext.mod_down(&acc0)?, ext.mod_down(&acc1)?))
}

/// Hybrid key switch of one component: returns (d0, d1) with
/// d0 + d1·s_out ≈ c·s_in over Q_l.
#[instrument(skip_all, fields(level = c.level()))]
pub fn switch_component(params: &CkksParams, c: &RnsPoly, key: &SwitchingKey) -> Result<(RnsPoly, RnsPoly)> {
    let digits = params.extender.decompose(c)?;
    switch_digits(params, &digits, key)
}
