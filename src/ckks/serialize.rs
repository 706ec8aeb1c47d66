//! Little-endian binary encoding of scheme objects.
//!
//! Every object starts with a type tag, a format version, the ring degree,
//! its level and the moduli it lives over. Decoding compares that header to
//! the receiving parameter set and rejects anything that does not match.

use std::io::{self, Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::keys::{PublicKey, RelinearizationKey, RotationKey, RotationKeys, SecretKey, SwitchingKey};
use crate::ckks::plaintext::Plaintext;
use crate::error::{HeError, Result};
use crate::params::CkksParams;
use crate::ring::ntt::NttPoly;
use crate::ring::rns::{QpPoly, RnsBasis, RnsPoly};

const FORMAT_VERSION: u8 = 1;
/// Upper bound on the degree of a decoded ciphertext.
const MAX_DEGREE: usize = 16;

pub(crate) mod tag {
    pub const CIPHERTEXT: u8 = b'C';
    pub const PLAINTEXT: u8 = b'T';
    pub const SECRET_KEY: u8 = b'S';
    pub const PUBLIC_KEY: u8 = b'K';
    pub const SWITCHING_KEY: u8 = b'W';
    pub const RELIN_KEY: u8 = b'R';
    pub const ROTATION_KEYS: u8 = b'G';
    pub const MK_CIPHERTEXT: u8 = b'M';
}

/// Binary encoding bound to a parameter set.
pub trait Marshal: Sized {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()>;

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out).expect("writing to a Vec cannot fail");
        out
    }

    /// Decode a whole buffer; truncated input is a `Serialization` error.
    fn from_bytes(params: &Arc<CkksParams>, bytes: &[u8]) -> Result<Self> {
        decode_exact(params, bytes).map_err(HeError::in_decoding)
    }
}

fn decode_exact<T: Marshal>(params: &Arc<CkksParams>, bytes: &[u8]) -> Result<T> {
    if bytes.is_empty() {
        return Err(HeError::Serialization("empty buffer".into()));
    }
    let mut r = Cursor::new(bytes);
    let value = T::read_from(params, &mut r)?;
    let mut rest = Vec::new();
    r.read_to_end(&mut rest)?;
    if !rest.is_empty() {
        return Err(HeError::Serialization(format!("{} trailing bytes", rest.len())));
    }
    Ok(value)
}

/// Tag, version, ring degree, level and the moduli in use.
pub(crate) fn write_header(out: &mut Vec<u8>, tag: u8, params: &CkksParams, level: usize, with_p: bool) -> io::Result<()> {
    out.write_u8(tag)?;
    out.write_u8(FORMAT_VERSION)?;
    out.write_u32::<LittleEndian>(params.ring_degree as u32)?;
    out.write_u32::<LittleEndian>(level as u32)?;
    let q = &params.q_moduli()[..=level];
    let p: &[u64] = if with_p { params.p_moduli() } else { &[] };
    for moduli in [q, p] {
        out.write_u32::<LittleEndian>(moduli.len() as u32)?;
        for &m in moduli {
            out.write_u64::<LittleEndian>(m)?;
        }
    }
    Ok(())
}

/// Check a header against `params`; returns the level.
pub(crate) fn read_header(r: &mut Cursor<&[u8]>, tag: u8, params: &CkksParams, with_p: bool) -> Result<usize> {
    let got = r.read_u8()?;
    if got != tag {
        return Err(HeError::Serialization(format!(
            "expected object tag {:?}, got {:?}",
            tag as char, got as char
        )));
    }
    let version = r.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(HeError::Serialization(format!("unsupported version {version}")));
    }
    let n = r.read_u32::<LittleEndian>()? as usize;
    if n != params.ring_degree {
        return Err(HeError::Serialization(format!(
            "ring degree {n} does not match {}",
            params.ring_degree
        )));
    }
    let level = r.read_u32::<LittleEndian>()? as usize;
    if level > params.max_level() {
        return Err(HeError::Serialization(format!("level {level} above {}", params.max_level())));
    }
    let expected_p: &[u64] = if with_p { params.p_moduli() } else { &[] };
    for expected in [&params.q_moduli()[..=level], expected_p] {
        let count = r.read_u32::<LittleEndian>()? as usize;
        if count != expected.len() {
            return Err(HeError::Serialization("modulus chain mismatch".into()));
        }
        for &m in expected {
            if r.read_u64::<LittleEndian>()? != m {
                return Err(HeError::Serialization("modulus chain mismatch".into()));
            }
        }
    }
    Ok(level)
}

pub(crate) fn read_count(r: &mut Cursor<&[u8]>, max: usize, what: &str) -> Result<usize> {
    let count = r.read_u32::<LittleEndian>()? as usize;
    if count > max {
        return Err(HeError::Serialization(format!("{what} count {count} exceeds {max}")));
    }
    Ok(count)
}

pub(crate) fn write_poly(out: &mut Vec<u8>, poly: &RnsPoly) -> io::Result<()> {
    for c in &poly.components {
        for &e in &c.evals {
            out.write_u64::<LittleEndian>(e)?;
        }
    }
    Ok(())
}

pub(crate) fn read_poly(r: &mut Cursor<&[u8]>, basis: &RnsBasis, count: usize) -> Result<RnsPoly> {
    let mut components = Vec::with_capacity(count);
    for plan in &basis.plans[..count] {
        let q = plan.modulus();
        let mut evals = vec![0u64; basis.ring_degree];
        r.read_u64_into::<LittleEndian>(&mut evals)?;
        if evals.iter().any(|&e| e >= q) {
            return Err(HeError::Serialization(format!("coefficient out of range for modulus {q}")));
        }
        components.push(NttPoly {
            evals,
            modulus: q,
            plan: plan.clone(),
        });
    }
    Ok(RnsPoly {
        components,
        ring_degree: basis.ring_degree,
    })
}

pub(crate) fn write_qp(out: &mut Vec<u8>, poly: &QpPoly) -> io::Result<()> {
    write_poly(out, &poly.q)?;
    write_poly(out, &poly.p)
}

pub(crate) fn read_qp(r: &mut Cursor<&[u8]>, params: &CkksParams, level: usize) -> Result<QpPoly> {
    Ok(QpPoly {
        q: read_poly(r, &params.ring_q, level + 1)?,
        p: read_poly(r, &params.ring_p, params.alpha())?,
    })
}

impl Marshal for Ciphertext {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::CIPHERTEXT, &self.params, self.level(), false)?;
        out.write_u32::<LittleEndian>(self.degree() as u32)?;
        out.write_f64::<LittleEndian>(self.scale)?;
        for c in &self.value {
            write_poly(out, c)?;
        }
        Ok(())
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::CIPHERTEXT, params, false)?;
        let degree = read_count(r, MAX_DEGREE, "degree")?;
        let scale = read_scale(r)?;
        let value = (0..=degree)
            .map(|_| read_poly(r, &params.ring_q, level + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Ciphertext {
            value,
            scale,
            params: params.clone(),
        })
    }
}

pub(crate) fn read_scale(r: &mut Cursor<&[u8]>) -> Result<f64> {
    let scale = r.read_f64::<LittleEndian>()?;
    if !(scale.is_finite() && scale > 0.0) {
        return Err(HeError::Serialization(format!("invalid scale {scale}")));
    }
    Ok(scale)
}

impl Marshal for Plaintext {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::PLAINTEXT, &self.params, self.level(), false)?;
        out.write_f64::<LittleEndian>(self.scale)?;
        write_poly(out, &self.value)
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::PLAINTEXT, params, false)?;
        let scale = read_scale(r)?;
        Ok(Plaintext {
            value: read_poly(r, &params.ring_q, level + 1)?,
            scale,
            params: params.clone(),
        })
    }
}

impl Marshal for SecretKey {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::SECRET_KEY, &self.params, self.value.level(), true)?;
        write_qp(out, &self.value)
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::SECRET_KEY, params, true)?;
        Ok(SecretKey {
            value: read_qp(r, params, level)?,
            params: params.clone(),
        })
    }
}

impl Marshal for PublicKey {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::PUBLIC_KEY, &self.params, self.b.level(), true)?;
        write_qp(out, &self.b)?;
        write_qp(out, &self.a)
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::PUBLIC_KEY, params, true)?;
        Ok(PublicKey {
            b: read_qp(r, params, level)?,
            a: read_qp(r, params, level)?,
            params: params.clone(),
        })
    }
}

fn write_switching_body(out: &mut Vec<u8>, key: &SwitchingKey) -> io::Result<()> {
    out.write_u32::<LittleEndian>(key.value.len() as u32)?;
    for [k0, k1] in &key.value {
        write_qp(out, k0)?;
        write_qp(out, k1)?;
    }
    Ok(())
}

fn read_switching_body(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>, level: usize) -> Result<SwitchingKey> {
    let digits = params.extender.beta(level);
    let count = r.read_u32::<LittleEndian>()? as usize;
    if count != digits {
        return Err(HeError::Serialization(format!(
            "switching key has {count} digits, expected {digits}"
        )));
    }
    let value = (0..count)
        .map(|_| -> Result<[QpPoly; 2]> { Ok([read_qp(r, params, level)?, read_qp(r, params, level)?]) })
        .collect::<Result<Vec<_>>>()?;
    Ok(SwitchingKey {
        value,
        params: params.clone(),
    })
}

fn switching_level(key: &SwitchingKey) -> usize {
    key.value.first().map_or(key.params.max_level(), |[k0, _]| k0.level())
}

impl Marshal for SwitchingKey {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::SWITCHING_KEY, &self.params, switching_level(self), true)?;
        write_switching_body(out, self)
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::SWITCHING_KEY, params, true)?;
        read_switching_body(params, r, level)
    }
}

impl Marshal for RelinearizationKey {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::RELIN_KEY, &self.key.params, switching_level(&self.key), true)?;
        write_switching_body(out, &self.key)
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::RELIN_KEY, params, true)?;
        Ok(RelinearizationKey {
            key: read_switching_body(params, r, level)?,
        })
    }
}

impl Marshal for RotationKeys {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::ROTATION_KEYS, &self.params, self.params.max_level(), true)?;
        out.write_u32::<LittleEndian>(self.keys.len() as u32)?;
        for key in self.keys.values() {
            out.write_u64::<LittleEndian>(key.galois as u64)?;
            write_switching_body(out, &key.key)?;
        }
        Ok(())
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::ROTATION_KEYS, params, true)?;
        let n = params.ring_degree;
        let count = read_count(r, n, "rotation key")?;
        let mut keys = RotationKeys::new(params);
        for _ in 0..count {
            let galois = r.read_u64::<LittleEndian>()? as usize;
            if galois % 2 == 0 || galois >= 2 * n {
                return Err(HeError::Serialization(format!("invalid galois element {galois}")));
            }
            let key = read_switching_body(params, r, level)?;
            keys.insert(RotationKey::new(key, galois));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckks::encoder::Encoder;
    use crate::ckks::encrypt::encrypt_sk_with_rng;
    use crate::ckks::keys::{
        gen_public_key_with_rng, gen_relin_key_with_rng, gen_rotation_keys_with_rng, gen_secret_key_with_rng,
        gen_switching_key_with_rng,
    };
    use crate::params::presets::{ckks_test, ckks_tiny};
    use num_complex::Complex64;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_object_roundtrips() {
        let params = ckks_tiny().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(51);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let sk2 = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let pk = gen_public_key_with_rng(&sk, &mut rng).unwrap();
        let rlk = gen_relin_key_with_rng(&sk, &mut rng).unwrap();
        let swk = gen_switching_key_with_rng(&sk, &sk2, &mut rng).unwrap();
        let rtks = gen_rotation_keys_with_rng(&sk, &[1, -1], true, &mut rng).unwrap();

        assert_eq!(SecretKey::from_bytes(&params, &sk.to_bytes()).unwrap(), sk);
        assert_eq!(PublicKey::from_bytes(&params, &pk.to_bytes()).unwrap(), pk);
        assert_eq!(RelinearizationKey::from_bytes(&params, &rlk.to_bytes()).unwrap(), rlk);
        assert_eq!(SwitchingKey::from_bytes(&params, &swk.to_bytes()).unwrap(), swk);
        assert_eq!(RotationKeys::from_bytes(&params, &rtks.to_bytes()).unwrap(), rtks);

        let enc = Encoder::new(&params);
        let pt = enc.encode_plaintext(&[Complex64::new(0.5, 0.25)], 2, params.scale).unwrap();
        assert_eq!(Plaintext::from_bytes(&params, &pt.to_bytes()).unwrap(), pt);
        let ct = encrypt_sk_with_rng(&pt, &sk, &mut rng).unwrap();
        let back = Ciphertext::from_bytes(&params, &ct.to_bytes()).unwrap();
        assert_eq!(back, ct);
        assert_eq!(back.level(), 2);
        assert_eq!(back.degree(), 1);
    }

    #[test]
    fn test_zero_ciphertext_roundtrip() {
        let params = ckks_tiny().unwrap();
        let ct = Ciphertext::zero(&params, 1, 0, params.scale);
        assert_eq!(Ciphertext::from_bytes(&params, &ct.to_bytes()).unwrap(), ct);
    }

    #[test]
    fn test_malformed_buffers_are_rejected() {
        let params = ckks_tiny().unwrap();
        let ct = Ciphertext::zero(&params, 1, 1, params.scale);
        let bytes = ct.to_bytes();

        assert!(matches!(Ciphertext::from_bytes(&params, &[]), Err(HeError::Serialization(_))));
        for cut in [bytes.len() - 3, bytes.len() / 2, 5] {
            assert!(
                matches!(Ciphertext::from_bytes(&params, &bytes[..cut]), Err(HeError::Serialization(_))),
                "cut at {cut}"
            );
        }
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(Ciphertext::from_bytes(&params, &extra).is_err());
        assert!(Plaintext::from_bytes(&params, &bytes).is_err());

        let mut bad = bytes.clone();
        let last = bad.len() - 8;
        bad[last..].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(Ciphertext::from_bytes(&params, &bad).is_err());
    }

    #[test]
    fn test_other_modulus_chain_is_rejected() {
        let tiny = ckks_tiny().unwrap();
        let other = ckks_test().unwrap();
        let ct = Ciphertext::zero(&tiny, 1, 0, tiny.scale);
        match Ciphertext::from_bytes(&other, &ct.to_bytes()) {
            Err(HeError::Serialization(msg)) => assert!(msg.contains("ring degree") || msg.contains("modulus")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_switching_key_with_missing_digits_is_rejected() {
        let params = ckks_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(52);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let mut rlk = gen_relin_key_with_rng(&sk, &mut rng).unwrap();
        assert_eq!(rlk.key.value.len(), params.beta());
        rlk.key.value.truncate(1);
        match RelinearizationKey::from_bytes(&params, &rlk.to_bytes()) {
            Err(HeError::Serialization(msg)) => assert!(msg.contains("digits"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
