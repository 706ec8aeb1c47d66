pub mod ciphertext;
pub mod encoder;
pub mod encrypt;
pub mod eval;
pub mod keys;
pub mod keyswitch;
pub mod plaintext;
pub mod polyeval;
pub mod serialize;

pub use ciphertext::{Ciphertext, Operand};
pub use encoder::{Encoded, Encoder, OutputKind};
pub use encrypt::{decrypt, encrypt_pk, encrypt_pk_with_rng, encrypt_sk, encrypt_sk_with_rng};
pub use eval::{EvaluationKeySet, Evaluator, SCALE_TOLERANCE};
pub use keys::{
    gen_public_key, gen_public_key_with_rng, gen_relin_key, gen_relin_key_with_rng, gen_rotation_keys,
    gen_rotation_keys_pow2_with_rng, gen_rotation_keys_with_rng, gen_secret_key, gen_secret_key_with_rng,
    gen_switching_key_with_rng, PublicKey, RelinearizationKey, RotationKey, RotationKeys, SecretKey, SwitchingKey,
};
pub use plaintext::Plaintext;
pub use polyeval::{chebyshev, ChebyshevApprox};
pub use serialize::Marshal;
