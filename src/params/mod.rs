pub mod presets;
pub mod primes;

use std::io::{Cursor, Read};
use std::ops::Range;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_bigint::BigUint;
use tracing::{debug, warn};

use crate::error::{HeError, Result};
use crate::ring::basis::Extender;
use crate::ring::galois::galois_element;
use crate::ring::modular::is_prime;
use crate::ring::rns::RnsBasis;

const PARAMS_TAG: u8 = b'P';
const PARAMS_VERSION: u8 = 1;

/// Parameters for the approximate-arithmetic scheme with hybrid key switching.
///
/// Derived rings and key-switching tables are built once and shared read-only
/// through the `Arc` returned by [`CkksParamsBuilder::build`].
#[derive(Debug)]
pub struct CkksParams {
    pub log_n: usize,
    /// Ring degree N.
    pub ring_degree: usize,
    pub log_slots: usize,
    /// Default encoding scale Δ.
    pub scale: f64,
    /// Gaussian noise standard deviation.
    pub sigma: f64,
    /// Fixed number of non-zero secret coefficients, or dense ternary if `None`.
    pub hamming_weight: Option<usize>,
    /// Modulus chain Q = [q_0, ..., q_L].
    pub ring_q: Arc<RnsBasis>,
    /// Special primes P used only while key switching.
    pub ring_p: Arc<RnsBasis>,
    pub extender: Extender,
}

/// Two parameter sets are equal when they describe the same rings and
/// encoding defaults; derived tables follow from those.
impl PartialEq for CkksParams {
    fn eq(&self, other: &Self) -> bool {
        self.ring_degree == other.ring_degree
            && self.log_slots == other.log_slots
            && self.scale == other.scale
            && self.sigma == other.sigma
            && self.hamming_weight == other.hamming_weight
            && self.q_moduli() == other.q_moduli()
            && self.p_moduli() == other.p_moduli()
    }
}

impl CkksParams {
    /// Highest level L.
    pub fn max_level(&self) -> usize {
        self.ring_q.num_moduli() - 1
    }

    pub fn slots(&self) -> usize {
        1 << self.log_slots
    }

    /// Galois element of a left rotation by `k` slots.
    ///
    /// Rotations act on the `slots()`-long message, so `k` is reduced modulo
    /// the slot count first; under sparse packing a rotation by `slots()` is
    /// the identity.
    pub fn rotation_element(&self, k: i64) -> usize {
        galois_element(k.rem_euclid(self.slots() as i64), self.ring_degree)
    }

    pub fn q_moduli(&self) -> &[u64] {
        &self.ring_q.moduli
    }

    pub fn p_moduli(&self) -> &[u64] {
        &self.ring_p.moduli
    }

    /// Number of special primes.
    pub fn alpha(&self) -> usize {
        self.ring_p.num_moduli()
    }

    /// Digit count at the top level, ⌈|Q| / |P|⌉.
    pub fn beta(&self) -> usize {
        self.extender.beta(self.max_level())
    }

    /// Q indices covered by digit `digit` at `level`.
    pub fn digit_range(&self, level: usize, digit: usize) -> Range<usize> {
        self.extender.digit_range(level, digit)
    }

    /// Bit size of Q·P.
    pub fn log_qp(&self) -> f64 {
        self.q_moduli()
            .iter()
            .chain(self.p_moduli())
            .map(|&q| (q as f64).log2())
            .sum()
    }

    /// Serialize the parameter set (moduli, sizes, scale, noise).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(PARAMS_TAG);
        out.push(PARAMS_VERSION);
        self.write_body(&mut out).expect("writing to a Vec cannot fail");
        out
    }

    fn write_body(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.log_n as u32)?;
        out.write_u32::<LittleEndian>(self.log_slots as u32)?;
        out.write_f64::<LittleEndian>(self.scale)?;
        out.write_f64::<LittleEndian>(self.sigma)?;
        out.write_u64::<LittleEndian>(self.hamming_weight.unwrap_or(0) as u64)?;
        for moduli in [self.q_moduli(), self.p_moduli()] {
            out.write_u32::<LittleEndian>(moduli.len() as u32)?;
            for &q in moduli {
                out.write_u64::<LittleEndian>(q)?;
            }
        }
        Ok(())
    }

    /// Parse and re-validate a parameter set written by [`CkksParams::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Arc<Self>> {
        Self::decode(bytes).map_err(HeError::in_decoding)
    }

    fn decode(bytes: &[u8]) -> Result<Arc<Self>> {
        if bytes.is_empty() {
            return Err(HeError::Serialization("empty buffer".into()));
        }
        let mut r = Cursor::new(bytes);
        if r.read_u8()? != PARAMS_TAG {
            return Err(HeError::Serialization("not a parameter set".into()));
        }
        let version = r.read_u8()?;
        if version != PARAMS_VERSION {
            return Err(HeError::Serialization(format!("unsupported version {version}")));
        }
        let log_n = r.read_u32::<LittleEndian>()? as usize;
        let log_slots = r.read_u32::<LittleEndian>()? as usize;
        let scale = r.read_f64::<LittleEndian>()?;
        let sigma = r.read_f64::<LittleEndian>()?;
        let h = r.read_u64::<LittleEndian>()? as usize;
        let q = read_moduli(&mut r)?;
        let p = read_moduli(&mut r)?;
        let mut rest = Vec::new();
        r.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(HeError::Serialization("trailing bytes after parameter set".into()));
        }

        let mut builder = CkksParamsBuilder::new()
            .log_n(log_n)
            .q_moduli(q)
            .p_moduli(p)
            .log_slots(log_slots)
            .scale(scale)
            .sigma(sigma);
        if h > 0 {
            builder = builder.hamming_weight(h);
        }
        builder.build()
    }
}

fn read_moduli(r: &mut Cursor<&[u8]>) -> Result<Vec<u64>> {
    let count = r.read_u32::<LittleEndian>()? as usize;
    if count > 64 {
        return Err(HeError::Serialization(format!("implausible modulus count {count}")));
    }
    (0..count)
        .map(|_| r.read_u64::<LittleEndian>().map_err(HeError::from))
        .collect()
}

/// Builder for [`CkksParams`].
#[derive(Clone, Debug)]
pub struct CkksParamsBuilder {
    log_n: usize,
    q_moduli: Vec<u64>,
    p_moduli: Vec<u64>,
    log_q: Vec<usize>,
    log_p: Vec<usize>,
    log_slots: Option<usize>,
    scale: Option<f64>,
    sigma: f64,
    hamming_weight: Option<usize>,
}

impl Default for CkksParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CkksParamsBuilder {
    pub fn new() -> Self {
        Self {
            log_n: 12,
            q_moduli: Vec::new(),
            p_moduli: Vec::new(),
            log_q: Vec::new(),
            log_p: Vec::new(),
            log_slots: None,
            scale: None,
            sigma: 3.2,
            hamming_weight: None,
        }
    }

    pub fn log_n(mut self, log_n: usize) -> Self {
        self.log_n = log_n;
        self
    }

    /// Explicit Q chain.
    pub fn q_moduli(mut self, moduli: Vec<u64>) -> Self {
        self.q_moduli = moduli;
        self
    }

    /// Explicit special primes.
    pub fn p_moduli(mut self, moduli: Vec<u64>) -> Self {
        self.p_moduli = moduli;
        self
    }

    /// Bit sizes of the Q chain; primes are generated at build time.
    pub fn log_q(mut self, bits: Vec<usize>) -> Self {
        self.log_q = bits;
        self
    }

    /// Bit sizes of the special primes.
    pub fn log_p(mut self, bits: Vec<usize>) -> Self {
        self.log_p = bits;
        self
    }

    pub fn log_slots(mut self, log_slots: usize) -> Self {
        self.log_slots = Some(log_slots);
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn log_scale(mut self, log_scale: u32) -> Self {
        self.scale = Some(2f64.powi(log_scale as i32));
        self
    }

    pub fn sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn hamming_weight(mut self, h: usize) -> Self {
        self.hamming_weight = Some(h);
        self
    }

    pub fn build(self) -> Result<Arc<CkksParams>> {
        if !(4..=17).contains(&self.log_n) {
            return Err(HeError::InvalidRingDegree(1usize.checked_shl(self.log_n as u32).unwrap_or(0)));
        }
        let n = 1usize << self.log_n;

        let mut q = self.q_moduli;
        if q.is_empty() {
            q = generate_chain(&self.log_q, n, &[])?;
        }
        let mut p = self.p_moduli;
        if p.is_empty() {
            p = generate_chain(&self.log_p, n, &q)?;
        }
        if q.is_empty() {
            return Err(HeError::ParameterInvalid("the Q chain needs at least one modulus".into()));
        }
        if p.is_empty() {
            return Err(HeError::ParameterInvalid("key switching needs at least one special prime".into()));
        }

        let all: Vec<u64> = q.iter().chain(p.iter()).copied().collect();
        for (i, &m) in all.iter().enumerate() {
            if m >= (1 << 61) {
                return Err(HeError::ParameterInvalid(format!("modulus {m} exceeds 61 bits")));
            }
            if m % (2 * n as u64) != 1 {
                return Err(HeError::ParameterInvalid(format!(
                    "modulus {m} is not NTT-friendly for N = {n} (needs m ≡ 1 mod {})",
                    2 * n
                )));
            }
            if !is_prime(m) {
                return Err(HeError::ParameterInvalid(format!("modulus {m} is not prime")));
            }
            if all[..i].contains(&m) {
                return Err(HeError::ParameterInvalid(format!("modulus {m} appears twice")));
            }
        }

        let log_slots = self.log_slots.unwrap_or(self.log_n - 1);
        if log_slots >= self.log_n {
            return Err(HeError::ParameterInvalid(format!(
                "log_slots = {log_slots} must be at most log_n - 1 = {}",
                self.log_n - 1
            )));
        }
        let scale = self.scale.unwrap_or(2f64.powi(40));
        if !(scale.is_finite() && scale > 0.0) {
            return Err(HeError::ParameterInvalid(format!("scale must be positive, got {scale}")));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(HeError::ParameterInvalid(format!("sigma must be positive, got {}", self.sigma)));
        }
        if let Some(h) = self.hamming_weight {
            if h == 0 || h > n {
                return Err(HeError::ParameterInvalid(format!("hamming weight {h} out of range for N = {n}")));
            }
        }

        let alpha = p.len();
        let big_p: BigUint = p.iter().fold(BigUint::from(1u32), |acc, &m| acc * m);
        let largest_digit = q
            .chunks(alpha)
            .map(|c| c.iter().fold(BigUint::from(1u32), |acc, &m| acc * m))
            .max()
            .unwrap_or_default();
        if big_p < largest_digit {
            warn!(
                p_bits = big_p.bits(),
                digit_bits = largest_digit.bits(),
                "special modulus is smaller than a decomposition digit; key-switching noise will not vanish after ModDown"
            );
        }

        let ring_q = Arc::new(RnsBasis::new(q, n)?);
        let ring_p = Arc::new(RnsBasis::new(p, n)?);
        if ring_p.order != ring_q.order {
            return Err(HeError::ParameterInvalid("Q and P NTT plans use different slot orders".into()));
        }
        let extender = Extender::new(ring_q.clone(), ring_p.clone())?;

        let params = CkksParams {
            log_n: self.log_n,
            ring_degree: n,
            log_slots,
            scale,
            sigma: self.sigma,
            hamming_weight: self.hamming_weight,
            ring_q,
            ring_p,
            extender,
        };
        debug!(
            log_n = params.log_n,
            max_level = params.max_level(),
            alpha = params.alpha(),
            beta = params.beta(),
            log_qp = params.log_qp(),
            "built parameter set"
        );
        Ok(Arc::new(params))
    }
}

/// Generate distinct primes for the given bit sizes, grouping equal sizes.
fn generate_chain(bits: &[usize], n: usize, exclude: &[u64]) -> Result<Vec<u64>> {
    let mut used: Vec<u64> = exclude.to_vec();
    let mut out = Vec::with_capacity(bits.len());
    for &b in bits {
        let q = primes::generate_ntt_primes(b, 1, n, &used)?[0];
        used.push(q);
        out.push(q);
    }
    Ok(out)
}
