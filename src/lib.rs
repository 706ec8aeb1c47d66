//! # mkckks: approximate homomorphic encryption for one or many key holders
//!
//! An RNS implementation of the approximate-arithmetic RLWE scheme with
//! hybrid (digit-decomposed, special-modulus) key switching, extended to
//! multi-key ciphertexts and to threshold key generation.
//!
//! - [`ckks`]: encoder, keys, encryption and the homomorphic evaluator,
//!   including polynomial and Chebyshev evaluation.
//! - [`multikey`]: joint ciphertexts under k independent secrets, with
//!   shared-key and on-the-fly relinearization.
//! - [`dkg`]: collective public, relinearization and rotation key
//!   generation, plus collective and public key switching.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mkckks::prelude::*;
//!
//! # fn main() -> mkckks::error::Result<()> {
//! let params = mkckks::params::presets::ckks_test()?;
//! let encoder = Encoder::new(&params);
//!
//! let sk = gen_secret_key(&params)?;
//! let pk = gen_public_key(&sk)?;
//! let keys = EvaluationKeySet {
//!     relin: Some(gen_relin_key(&sk)?),
//!     rotations: Some(gen_rotation_keys(&sk, &[1], false)?),
//! };
//! let eval = Evaluator::new(&params, keys)?;
//!
//! let x = encoder.encode_real(&[0.5, 0.25, -1.0], params.max_level(), params.scale)?;
//! let mut ct = encrypt_pk(&x, &pk)?;
//! let rhs = ct.clone();
//! eval.mul_relin(&mut ct, &rhs, true)?;
//! eval.rescale(&mut ct)?;
//! eval.rotate(&mut ct, 1)?;
//!
//! let values = encoder.decode_real(&decrypt(&ct, &sk)?)?;
//! assert!((values[0] - 0.0625).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```

pub mod ckks;
pub mod dkg;
pub mod error;
pub mod multikey;
pub mod params;
pub mod ring;
pub mod sampling;

/// Convenient re-exports for common types and functions.
pub mod prelude {
    pub use crate::ckks::{
        chebyshev, decrypt, encrypt_pk, encrypt_sk, gen_public_key, gen_relin_key, gen_rotation_keys,
        gen_secret_key, Ciphertext, ChebyshevApprox, Encoder, EvaluationKeySet, Evaluator, Marshal, Operand,
        OutputKind, Plaintext, PublicKey, RelinearizationKey, RotationKeys, SecretKey, SwitchingKey,
    };
    pub use crate::dkg::{Aggregate, CkgProtocol, CksProtocol, PcksProtocol, RkgProtocol, RtgProtocol};
    pub use crate::error::{HeError, Result};
    pub use crate::multikey::{Crs, MkCiphertext, MkEvaluator, MkPublicKey, MkSecretKey, PeerId};
    pub use crate::params::{CkksParams, CkksParamsBuilder};
    pub use crate::sampling::CrpGenerator;
}
