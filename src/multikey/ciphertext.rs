use std::io::{self, Cursor};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::serialize::{read_count, read_header, read_poly, read_scale, tag, write_header, write_poly, Marshal};
use crate::error::{HeError, Result};
use crate::multikey::keys::PeerId;
use crate::params::CkksParams;
use crate::ring::rns::RnsPoly;

/// Upper bound on the number of parties in a decoded ciphertext.
const MAX_PEERS: usize = 64;

/// Ciphertext under the concatenated secret (1, s_1, ..., s_k).
///
/// A linear ciphertext has k+1 components and decrypts to c_0 + Σ c_i·s_i.
/// After a tensor product it holds (k+1)² components in row-major order,
/// c[i·(k+1)+j] pairing slot i with slot j, and decrypts to Σ c[i][j]·s_i·s_j
/// with s_0 = 1. `peers` is sorted and names the party behind each slot.
#[derive(Clone, Debug)]
pub struct MkCiphertext {
    pub peers: Vec<PeerId>,
    pub value: Vec<RnsPoly>,
    pub scale: f64,
    pub params: Arc<CkksParams>,
}

impl MkCiphertext {
    /// Lift a single-key ciphertext of `peer` into the joint setting.
    pub fn from_single(ct: &Ciphertext, peer: PeerId) -> Result<Self> {
        if ct.degree() != 1 {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                got: ct.degree(),
            });
        }
        Ok(Self {
            peers: vec![peer],
            value: ct.value.clone(),
            scale: ct.scale,
            params: ct.params.clone(),
        })
    }

    pub fn num_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn level(&self) -> usize {
        self.value.first().map_or(0, |c| c.level())
    }

    /// True between a tensor product and its relinearization.
    pub fn is_tensored(&self) -> bool {
        self.value.len() != self.peers.len() + 1
    }

    /// Slot of `peer`, counting the constant term as slot 0.
    pub fn slot_of(&self, peer: PeerId) -> Result<usize> {
        self.peers
            .binary_search(&peer)
            .map(|i| i + 1)
            .map_err(|_| HeError::PeerMismatch(format!("peer {peer} is not part of this ciphertext")))
    }

    pub(crate) fn check_linear(&self) -> Result<()> {
        if self.is_tensored() {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                got: 2,
            });
        }
        Ok(())
    }

    /// Re-index onto a sorted superset of the current peers, padding the new
    /// slots with zero.
    pub fn extend(&mut self, peers: &[PeerId]) -> Result<()> {
        if peers == self.peers.as_slice() {
            return Ok(());
        }
        if peers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HeError::PeerMismatch("peer list must be sorted and distinct".into()));
        }
        let mut map = Vec::with_capacity(self.peers.len() + 1);
        map.push(0usize);
        for p in &self.peers {
            let pos = peers
                .binary_search(p)
                .map_err(|_| HeError::PeerMismatch(format!("peer {p} missing from the extended set")))?;
            map.push(pos + 1);
        }

        let width = peers.len() + 1;
        let count = self.level() + 1;
        let ring_q = &self.params.ring_q;
        let old: Vec<RnsPoly> = std::mem::take(&mut self.value);
        self.value = if old.len() == map.len() {
            let mut out: Vec<RnsPoly> = (0..width).map(|_| ring_q.zero(count)).collect();
            for (c, &to) in old.into_iter().zip(&map) {
                out[to] = c;
            }
            out
        } else {
            let old_width = map.len();
            let mut out: Vec<RnsPoly> = (0..width * width).map(|_| ring_q.zero(count)).collect();
            for (idx, c) in old.into_iter().enumerate() {
                out[map[idx / old_width] * width + map[idx % old_width]] = c;
            }
            out
        };
        self.peers = peers.to_vec();
        Ok(())
    }

    /// Sorted union of two peer lists.
    pub fn union_peers(a: &[PeerId], b: &[PeerId]) -> Vec<PeerId> {
        let mut out: Vec<PeerId> = a.iter().chain(b).copied().collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl PartialEq for MkCiphertext {
    fn eq(&self, other: &Self) -> bool {
        self.peers == other.peers && self.scale == other.scale && self.value == other.value
    }
}

impl Marshal for MkCiphertext {
    fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        write_header(out, tag::MK_CIPHERTEXT, &self.params, self.level(), false)?;
        out.write_u32::<LittleEndian>(self.peers.len() as u32)?;
        for &p in &self.peers {
            out.write_u64::<LittleEndian>(p)?;
        }
        out.write_u8(self.is_tensored() as u8)?;
        out.write_f64::<LittleEndian>(self.scale)?;
        for c in &self.value {
            write_poly(out, c)?;
        }
        Ok(())
    }

    fn read_from(params: &Arc<CkksParams>, r: &mut Cursor<&[u8]>) -> Result<Self> {
        let level = read_header(r, tag::MK_CIPHERTEXT, params, false)?;
        let k = read_count(r, MAX_PEERS, "peer")?;
        if k == 0 {
            return Err(HeError::Serialization("ciphertext without peers".into()));
        }
        let mut peers = Vec::with_capacity(k);
        for _ in 0..k {
            peers.push(r.read_u64::<LittleEndian>()?);
        }
        if peers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HeError::Serialization("peer list not sorted".into()));
        }
        let len = match r.read_u8()? {
            0 => k + 1,
            1 => (k + 1) * (k + 1),
            other => return Err(HeError::Serialization(format!("invalid shape flag {other}"))),
        };
        let scale = read_scale(r)?;
        let value = (0..len)
            .map(|_| read_poly(r, &params.ring_q, level + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            peers,
            value,
            scale,
            params: params.clone(),
        })
    }
}
