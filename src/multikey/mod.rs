//! Multi-key ciphertexts: k parties with independent secrets computing on one
//! joint ciphertext.
//!
//! Each party publishes a public key and an evaluation key built against a
//! common reference string. Joint ciphertexts grow one component per party
//! and are decrypted by combining one partial decryption per participant.

pub mod ciphertext;
pub mod encrypt;
pub mod eval;
pub mod keys;
pub mod relin;

pub use ciphertext::MkCiphertext;
pub use encrypt::{decrypt, encrypt, encrypt_with_rng, merge, partial_decrypt_with_rng, PartialDecryption};
pub use eval::MkEvaluator;
pub use keys::{
    gen_mk_keys_with_rng, gen_shared_row_with_rng, Crs, MkEvaluationKey, MkPublicKey, MkRelinearizationKey,
    MkSecretKey, PeerId, SharedKey,
};
pub use relin::{relinearize_on_the_fly, relinearize_shared};
