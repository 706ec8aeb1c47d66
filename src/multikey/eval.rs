use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use num_complex::Complex64;
use tracing::{debug, instrument};

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::eval::{scale_factors, EvaluationKeySet, Evaluator};
use crate::ckks::keys::{RotationKey, RotationKeys};
use crate::ckks::keyswitch::switch_component;
use crate::ckks::plaintext::Plaintext;
use crate::error::{HeError, Result};
use crate::multikey::ciphertext::MkCiphertext;
use crate::multikey::keys::{MkEvaluationKey, MkPublicKey, MkRelinearizationKey, PeerId};
use crate::multikey::relin::{relinearize_on_the_fly, relinearize_shared};
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Operators on joint ciphertexts.
///
/// Holds the public material of every known party. Relinearization uses the
/// shared key matrix when it covers the ciphertext's peers and falls back to
/// the on-the-fly method otherwise. Like [`Evaluator`], every operator checks
/// its inputs before mutating the destination.
#[derive(Clone, Debug)]
pub struct MkEvaluator {
    params: Arc<CkksParams>,
    inner: Evaluator,
    relin: Option<MkRelinearizationKey>,
    pks: BTreeMap<PeerId, MkPublicKey>,
    evks: BTreeMap<PeerId, MkEvaluationKey>,
    rotations: BTreeMap<PeerId, RotationKeys>,
}

impl MkEvaluator {
    pub fn new(params: &Arc<CkksParams>) -> Result<Self> {
        Ok(Self {
            params: params.clone(),
            inner: Evaluator::new(params, EvaluationKeySet::default())?,
            relin: None,
            pks: BTreeMap::new(),
            evks: BTreeMap::new(),
            rotations: BTreeMap::new(),
        })
    }

    pub fn params(&self) -> &Arc<CkksParams> {
        &self.params
    }

    /// Register a party's public and evaluation keys.
    pub fn add_party(&mut self, pk: MkPublicKey, evk: MkEvaluationKey) -> Result<()> {
        if pk.peer != evk.peer {
            return Err(HeError::PeerMismatch(format!(
                "public key of {} paired with evaluation key of {}",
                pk.peer, evk.peer
            )));
        }
        debug!(peer = pk.peer, "party registered");
        self.evks.insert(evk.peer, evk);
        self.pks.insert(pk.peer, pk);
        Ok(())
    }

    pub fn set_relin_key(&mut self, rlk: MkRelinearizationKey) {
        self.relin = Some(rlk);
    }

    /// Rotation keys generated by `peer` for its own secret.
    pub fn add_rotation_keys(&mut self, peer: PeerId, keys: RotationKeys) {
        self.rotations.insert(peer, keys);
    }

    pub fn public_key(&self, peer: PeerId) -> Result<&MkPublicKey> {
        self.pks
            .get(&peer)
            .ok_or_else(|| HeError::MissingKey(format!("public key of peer {peer}")))
    }

    /// Run a single-key operator on the flattened components.
    fn on_flat<F>(&self, dst: &mut MkCiphertext, op: F) -> Result<()>
    where
        F: FnOnce(&Evaluator, &mut Ciphertext) -> Result<()>,
    {
        let mut flat = Ciphertext {
            value: mem::take(&mut dst.value),
            scale: dst.scale,
            params: dst.params.clone(),
        };
        let out = op(&self.inner, &mut flat);
        dst.value = flat.value;
        dst.scale = flat.scale;
        out
    }

    /// Bring a linear ciphertext into the (k+1)² layout: c_t moves to c[t][0].
    fn to_tensored(&self, ct: &mut MkCiphertext) {
        if ct.is_tensored() {
            return;
        }
        let width = ct.num_peers() + 1;
        let count = ct.level() + 1;
        let mut out: Vec<RnsPoly> = (0..width * width).map(|_| self.params.ring_q.zero(count)).collect();
        for (t, c) in mem::take(&mut ct.value).into_iter().enumerate() {
            out[t * width] = c;
        }
        ct.value = out;
    }

    fn check_level(dst: &MkCiphertext, rhs: &MkCiphertext) -> Result<()> {
        if dst.level() != rhs.level() {
            return Err(HeError::LevelMismatch {
                expected: dst.level(),
                got: rhs.level(),
            });
        }
        Ok(())
    }

    fn combine(&self, dst: &mut MkCiphertext, rhs: &MkCiphertext, subtract: bool) -> Result<()> {
        Self::check_level(dst, rhs)?;
        scale_factors(dst.scale, rhs.scale)?;
        let peers = MkCiphertext::union_peers(&dst.peers, &rhs.peers);
        let mut rhs = rhs.clone();
        dst.extend(&peers)?;
        rhs.extend(&peers)?;
        if dst.is_tensored() || rhs.is_tensored() {
            self.to_tensored(dst);
            self.to_tensored(&mut rhs);
        }
        let flat_rhs = Ciphertext {
            value: rhs.value,
            scale: rhs.scale,
            params: rhs.params,
        };
        if subtract {
            self.on_flat(dst, |ev, ct| ev.sub(ct, &flat_rhs))
        } else {
            self.on_flat(dst, |ev, ct| ev.add(ct, &flat_rhs))
        }
    }

    /// dst += rhs over the union of both peer sets.
    pub fn add(&self, dst: &mut MkCiphertext, rhs: &MkCiphertext) -> Result<()> {
        self.combine(dst, rhs, false)
    }

    /// dst -= rhs over the union of both peer sets.
    pub fn sub(&self, dst: &mut MkCiphertext, rhs: &MkCiphertext) -> Result<()> {
        self.combine(dst, rhs, true)
    }

    /// Add a plaintext to the constant term.
    pub fn add_plain(&self, dst: &mut MkCiphertext, pt: &Plaintext) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.add(ct, pt))
    }

    pub fn neg(&self, dst: &mut MkCiphertext) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.neg(ct))
    }

    pub fn add_const(&self, dst: &mut MkCiphertext, c: Complex64) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.add_const(ct, c))
    }

    pub fn mult_by_const(&self, dst: &mut MkCiphertext, c: Complex64) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.mult_by_const(ct, c))
    }

    pub fn rescale(&self, dst: &mut MkCiphertext) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.rescale(ct))
    }

    pub fn drop_level(&self, dst: &mut MkCiphertext, n: usize) -> Result<()> {
        self.on_flat(dst, |ev, ct| ev.drop_level(ct, n))
    }

    /// Tensor product of two linear ciphertexts over the union of their peers.
    ///
    /// Leaves (k+1)² components; the scale becomes the product of both.
    pub fn tensor(&self, dst: &mut MkCiphertext, rhs: &MkCiphertext) -> Result<()> {
        Self::check_level(dst, rhs)?;
        dst.check_linear()?;
        rhs.check_linear()?;
        let peers = MkCiphertext::union_peers(&dst.peers, &rhs.peers);
        let mut rhs = rhs.clone();
        dst.extend(&peers)?;
        rhs.extend(&peers)?;

        let mut out = Vec::with_capacity(dst.value.len() * rhs.value.len());
        for a in &dst.value {
            for b in &rhs.value {
                out.push(a.mul(b)?);
            }
        }
        dst.value = out;
        dst.scale *= rhs.scale;
        Ok(())
    }

    /// Fold a tensored ciphertext back to k+1 components.
    pub fn relinearize(&self, dst: &mut MkCiphertext) -> Result<()> {
        match &self.relin {
            Some(rlk) if rlk.covers(&dst.peers) => relinearize_shared(&self.params, dst, rlk),
            _ => relinearize_on_the_fly(&self.params, dst, &self.pks, &self.evks),
        }
    }

    /// Tensor product followed by relinearization.
    pub fn mul_relin(&self, dst: &mut MkCiphertext, rhs: &MkCiphertext) -> Result<()> {
        let mut out = dst.clone();
        self.tensor(&mut out, rhs)?;
        self.relinearize(&mut out)?;
        *dst = out;
        Ok(())
    }

    fn party_keys(&self, peers: &[PeerId], pick: impl Fn(&RotationKeys) -> Result<&RotationKey>) -> Result<Vec<&RotationKey>> {
        peers
            .iter()
            .map(|p| {
                let keys = self
                    .rotations
                    .get(p)
                    .ok_or_else(|| HeError::MissingKey(format!("rotation keys of peer {p}")))?;
                pick(keys)
            })
            .collect()
    }

    /// Apply the automorphism to every component, then switch each party's
    /// term back to its own secret with that party's key.
    fn automorphism(&self, dst: &mut MkCiphertext, keys: &[&RotationKey]) -> Result<()> {
        let Some(first) = keys.first() else {
            return Ok(());
        };
        let table = &first.permutation;
        let mut c0 = dst.value[0].permute(table);
        let mut terms = Vec::with_capacity(keys.len());
        for (t, key) in keys.iter().enumerate() {
            let c = dst.value[t + 1].permute(table);
            let (d0, d1) = switch_component(&self.params, &c, &key.key)?;
            c0.add_assign(&d0)?;
            terms.push(d1);
        }
        dst.value = std::iter::once(c0).chain(terms).collect();
        Ok(())
    }

    /// Rotate slots left by `k`; every participant must have supplied a key.
    #[instrument(skip_all, fields(k, peers = dst.num_peers()))]
    pub fn rotate(&self, dst: &mut MkCiphertext, k: i64) -> Result<()> {
        dst.check_linear()?;
        if self.params.rotation_element(k) == 1 {
            return Ok(());
        }
        let keys = self.party_keys(&dst.peers, |rk| rk.for_rotation(k))?;
        self.automorphism(dst, &keys)
    }

    #[instrument(skip_all, fields(peers = dst.num_peers()))]
    pub fn conjugate(&self, dst: &mut MkCiphertext) -> Result<()> {
        dst.check_linear()?;
        let keys = self.party_keys(&dst.peers, |rk| rk.for_conjugation())?;
        self.automorphism(dst, &keys)
    }
}
