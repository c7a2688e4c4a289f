//! Anti-equivocation EOTS signing and single-use nonce custody (spec.md §4.A
//! / §4.B): key creation, deterministic public-randomness derivation, and
//! the two signing operations (`sign_eots`, `sign_schnorr`) the rest of the
//! agent calls into.

pub mod crypto;
pub mod digest;
pub mod error;
pub mod keystore;
pub mod manager;
pub mod nonce_store;

pub use crypto::Signature;
pub use error::NonceStoreError;
pub use manager::{EotsManager, MasterSecret};
pub use nonce_store::{NonceKey, NonceStore};
