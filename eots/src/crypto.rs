//! Single-party Schnorr/EOTS signing over secp256k1.
//!
//! Grounded on `multisig/src/crypto/bitcoin.rs`'s `BtcCryptoScheme` (the
//! tagged-hash challenge, the even-y nonce/key negation convention), but
//! specialized to the non-threshold case: there is one signer and one
//! nonce scalar per signature, so `build_response`'s `lambda_i` term drops
//! out entirely. Where the teacher builds its own `Point`/`Scalar` algebra
//! on top of `secp256k1::{PublicKey, SecretKey}` to get generic EC-group
//! operations, this module stays directly on `secp256k1` tweak arithmetic
//! (`add_tweak`/`mul_tweak`/`negate`) since only one concrete curve is ever
//! needed here.

use num_bigint::BigUint;
use secp256k1::{constants::CURVE_ORDER, All, Keypair, Parity, Scalar, Secp256k1, SecretKey};

use fp_primitives::tagged_hash::tagged_hash;

/// The standard BIP-340 challenge tag, not an EOTS-specific one: `sign_eots`
/// produces an ordinary `(R, s)` BIP-340 signature (the "extractable" part is
/// in how the nonce is sourced, not in the signature equation), so it must
/// hash the challenge exactly the way `secp.verify_schnorr` — and the
/// on-chain verifier — does, or no signature this agent emits would verify.
const CHALLENGE_TAG: &[u8] = b"BIP0340/challenge";
const NONCE_TAG: &[u8] = b"EOTS/nonce";

/// A single EOTS/Schnorr signature: `(R.x, s)`, the standard BIP-340 64-byte
/// encoding split into its two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature {
	pub r_x: [u8; 32],
	pub s: [u8; 32],
}

impl Signature {
	pub fn to_bytes(&self) -> [u8; 64] {
		let mut out = [0u8; 64];
		out[..32].copy_from_slice(&self.r_x);
		out[32..].copy_from_slice(&self.s);
		out
	}
}

/// Reduces an arbitrary 32-byte string into the scalar field mod the group
/// order, matching `Scalar::from_bytes_mod_order` in the teacher's
/// `secp256k1.rs`. A SHA-256 output is always less than `2 * order`, so a
/// single conditional subtraction suffices.
fn scalar_from_bytes_mod_order(bytes: &[u8; 32]) -> Scalar {
	let order = BigUint::from_bytes_be(&CURVE_ORDER);
	let mut x = BigUint::from_bytes_be(bytes);
	if x >= order {
		x -= &order;
	}
	let mut out = [0u8; 32];
	let x_bytes = x.to_bytes_be();
	out[32 - x_bytes.len()..].copy_from_slice(&x_bytes);
	// `x` is strictly less than `order` by construction.
	Scalar::from_be_bytes(out).expect("reduced value is within the curve order")
}

/// Deterministically derives the secret nonce scalar for one height.
///
/// Domain is `(provider secret, chain_id, height)`, not the shared master
/// secret alone: keying on the provider's own signing scalar (rather than a
/// manager-wide master secret) keeps nonces for two differently-keyed
/// providers on the same chain and height from colliding, while remaining a
/// pure function of its inputs so a lost-but-unconsumed batch can always be
/// regenerated (spec.md §4.B).
pub fn derive_nonce_scalar(provider_secret: &SecretKey, chain_id: &str, height: u64) -> SecretKey {
	let preimage: Vec<u8> = [provider_secret.as_ref() as &[u8], chain_id.as_bytes(), &height.to_be_bytes()]
		.concat();
	let digest = tagged_hash(NONCE_TAG, &[&preimage]);
	let scalar = scalar_from_bytes_mod_order(&digest);
	// A tagged-hash output landing on exactly zero happens with
	// probability ~2^-256; there is no sane recovery path, so this
	// would indicate a broken hash function rather than bad luck.
	SecretKey::from_slice(&scalar.to_be_bytes()).expect("derived nonce scalar must be non-zero")
}

/// The x-only public form of a nonce scalar: the `R` a commitment batch
/// publishes and later proves inclusion for.
pub fn public_nonce_x(secp: &Secp256k1<All>, nonce_secret: &SecretKey) -> [u8; 32] {
	let keypair = Keypair::from_secret_key(secp, nonce_secret);
	keypair.x_only_public_key().0.serialize()
}

fn negate_for_even_y(secp: &Secp256k1<All>, secret: &SecretKey) -> ([u8; 32], SecretKey) {
	let keypair = Keypair::from_secret_key(secp, secret);
	let (xonly, parity) = keypair.x_only_public_key();
	let canonical = match parity {
		Parity::Even => secret.clone(),
		Parity::Odd => secret.clone().negate(),
	};
	(xonly.serialize(), canonical)
}

fn challenge(r_x: &[u8; 32], pk_x: &[u8; 32], message_digest: &[u8; 32]) -> Scalar {
	let digest = tagged_hash(CHALLENGE_TAG, &[r_x, pk_x, message_digest]);
	scalar_from_bytes_mod_order(&digest)
}

/// Produces `s = k + e * x mod n` where `e = H(R || pk || msg)`, following
/// the BIP-340 even-y convention for both the nonce and the signing key.
///
/// This is the one place the "extractable" half of EOTS lives: nothing
/// here prevents calling this function twice with the same `nonce_secret`
/// and a different `message_digest` — that would leak `provider_secret`
/// algebraically. The caller (the nonce store's `mark_consumed` critical
/// section in [`crate::manager::EotsManager::sign_eots`]) is what makes
/// that impossible in practice.
pub fn sign_eots(
	secp: &Secp256k1<All>,
	provider_secret: &SecretKey,
	nonce_secret: &SecretKey,
	message_digest: &[u8; 32],
) -> Signature {
	let (pk_x, d) = negate_for_even_y(secp, provider_secret);
	let (r_x, k) = negate_for_even_y(secp, nonce_secret);

	let e = challenge(&r_x, &pk_x, message_digest);
	let ed = d.mul_tweak(&e).expect("multiplying two valid scalars cannot fail");
	let s = k.add_tweak(&Scalar::from(ed)).expect("adding two valid scalars cannot fail");

	Signature { r_x, s: s.secret_bytes() }
}

/// BIP-340 Schnorr signing for non-EOTS messages (the commitment signature
/// itself). Unlike `sign_eots`, each call uses a fresh internally-generated
/// nonce (via `secp256k1`'s own RFC6979-style derivation), so there is no
/// equivocation surface: no two calls ever share a nonce because none is
/// supplied by the caller.
pub fn sign_schnorr(secp: &Secp256k1<All>, secret: &SecretKey, message_digest: &[u8; 32]) -> Signature {
	let keypair = Keypair::from_secret_key(secp, secret);
	let msg = secp256k1::Message::from_digest(*message_digest);
	let sig = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
	let bytes = sig.serialize();
	let mut r_x = [0u8; 32];
	let mut s = [0u8; 32];
	r_x.copy_from_slice(&bytes[..32]);
	s.copy_from_slice(&bytes[32..]);
	Signature { r_x, s }
}

/// Verifies a [`Signature`] produced by either `sign_eots` or
/// `sign_schnorr` (both share the same `(R, s)` shape and equation).
pub fn verify(
	secp: &Secp256k1<All>,
	pubkey: &secp256k1::XOnlyPublicKey,
	message_digest: &[u8; 32],
	signature: &Signature,
) -> bool {
	let Ok(raw) = secp256k1::schnorr::Signature::from_slice(&signature.to_bytes()) else {
		return false;
	};
	let msg = secp256k1::Message::from_digest(*message_digest);
	secp.verify_schnorr(&raw, &msg, pubkey).is_ok()
}
