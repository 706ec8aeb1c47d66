use std::sync::Arc;

use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Encoded message: one ring element over Q_level in NTT form, with its scale.
#[derive(Clone, Debug)]
pub struct Plaintext {
    pub value: RnsPoly,
    pub scale: f64,
    pub params: Arc<CkksParams>,
}

impl Plaintext {
    /// Zero plaintext at `level`.
    pub fn zero(params: &Arc<CkksParams>, level: usize, scale: f64) -> Self {
        Self {
            value: params.ring_q.zero(level + 1),
            scale,
            params: params.clone(),
        }
    }

    pub fn level(&self) -> usize {
        self.value.level()
    }
}

impl PartialEq for Plaintext {
    fn eq(&self, other: &Self) -> bool {
        self.scale == other.scale && self.value == other.value
    }
}
