//! [`EotsManager`]: the single entry point the rest of the agent uses to
//! create keys, derive public-randomness batches, and produce EOTS/Schnorr
//! signatures (spec.md §4.B). It owns the critical section that makes
//! anti-equivocation actually hold: `sign_eots` computes a signature and
//! marks its nonce consumed without ever handing a signature back for a
//! nonce that failed to be marked.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use bitcoin::bip32::{DerivationPath, Xpriv};
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::Zeroizing;

use fp_primitives::AgentError;
use fp_store::{Namespace, PersistentKv};

use crate::{
	crypto,
	keystore::{self, EncryptedSecret},
	nonce_store::{NonceKey, NonceStore},
};

const KEYSTORE_NAMESPACE: &[u8] = b"eots-keys";
const MASTER_SECRET_NAMESPACE: &[u8] = b"eots-master";
const MASTER_SECRET_KEY: &[u8] = b"seed";

/// The process-lifetime root of all provider keys this manager can derive
/// (spec.md §4.B / §9): a BIP32 extended private key. Only the 32-byte seed
/// is held in memory; the `Xpriv` itself (seed plus derived chain code) is
/// reconstructed on demand, which keeps the zeroized region as small as the
/// sensitive material actually is.
pub struct MasterSecret {
	seed: Zeroizing<Vec<u8>>,
	network: bitcoin::Network,
}

impl MasterSecret {
	pub fn from_seed(seed: Vec<u8>, network: bitcoin::Network) -> Result<Self, AgentError> {
		if seed.len() < 16 {
			return Err(AgentError::FatalInit(anyhow::anyhow!(
				"master seed must be at least 16 bytes, got {}",
				seed.len()
			)));
		}
		Ok(Self { seed: Zeroizing::new(seed), network })
	}

	fn xpriv(&self) -> Xpriv {
		Xpriv::new_master(self.network, &self.seed).expect("seed length was validated on construction")
	}

	/// Loads the master seed persisted under `passphrase` in `kv`, or
	/// generates a fresh random one and persists it encrypted on first run.
	///
	/// Follows the exact same AEAD pattern `EotsManager::create_key` uses for
	/// per-provider keys (spec.md §6: "the master-key material is stored
	/// separately under a passphrase-derived symmetric cipher") rather than
	/// reimplementing a second key-at-rest scheme for one more secret.
	pub fn load_or_generate(
		kv: &PersistentKv,
		passphrase: &str,
		network: bitcoin::Network,
	) -> Result<Self, AgentError> {
		let ns = Namespace::new(MASTER_SECRET_NAMESPACE);
		let seed = match kv
			.get::<EncryptedSecret>(ns, MASTER_SECRET_KEY)
			.map_err(|e| AgentError::Corruption(e.to_string()))?
		{
			Some(entry) => keystore::decrypt(passphrase, &entry)?.to_vec(),
			None => {
				let seed = rand_bytes::<32>();
				let salt = rand_bytes::<16>();
				let nonce = rand_bytes::<12>();
				let entry = keystore::encrypt(passphrase, &seed, salt, nonce);
				kv.put(ns, MASTER_SECRET_KEY, &entry).map_err(|e| AgentError::Corruption(e.to_string()))?;
				seed.to_vec()
			},
		};
		Self::from_seed(seed, network)
	}
}

/// Ties together key custody, nonce issuance, and signing for every
/// finality-provider identity this process manages (spec.md §4.B).
pub struct EotsManager {
	secp: Secp256k1<secp256k1::All>,
	master: MasterSecret,
	nonce_store: NonceStore,
	keystore_ns: Namespace,
	kv: Arc<PersistentKv>,
	/// Decrypted provider secrets, cached for the process lifetime once a
	/// passphrase has been supplied via `create_key` or `unlock_key`.
	loaded: std::sync::Mutex<HashMap<XOnlyPublicKey, Zeroizing<[u8; 32]>>>,
}

impl EotsManager {
	pub fn new(kv: Arc<PersistentKv>, master: MasterSecret) -> Self {
		let nonce_store = NonceStore::new(kv.clone());
		Self {
			secp: Secp256k1::new(),
			master,
			nonce_store,
			keystore_ns: Namespace::new(KEYSTORE_NAMESPACE),
			kv,
			loaded: std::sync::Mutex::new(HashMap::new()),
		}
	}

	/// Derives a fresh provider key at `hd_path` under the master secret,
	/// encrypts it at rest under `passphrase` keyed by `name`, and caches
	/// the decrypted secret in memory so subsequent `sign_*` calls don't
	/// need the passphrase again this process (spec.md §4.B `create_key`).
	pub fn create_key(
		&self,
		name: &str,
		passphrase: &str,
		hd_path: &str,
	) -> Result<XOnlyPublicKey, AgentError> {
		let path = DerivationPath::from_str(hd_path)
			.map_err(|e| AgentError::FatalInit(anyhow::anyhow!("invalid HD path {hd_path}: {e}")))?;
		let child = self
			.master
			.xpriv()
			.derive_priv(&self.secp, &path)
			.map_err(|e| AgentError::FatalInit(anyhow::anyhow!("HD derivation failed: {e}")))?;
		let secret = child.private_key;
		let pubkey = Keypair::from_secret_key(&self.secp, &secret).x_only_public_key().0;

		let salt = rand_bytes::<16>();
		let nonce = rand_bytes::<12>();
		let encrypted = keystore::encrypt(passphrase, &secret.secret_bytes(), salt, nonce);
		self.kv
			.put(self.keystore_ns, name.as_bytes(), &encrypted)
			.map_err(|e| AgentError::Corruption(e.to_string()))?;
		self.kv
			.put(self.keystore_ns, &pk_index_key(&pubkey), &name.to_string())
			.map_err(|e| AgentError::Corruption(e.to_string()))?;

		self.loaded.lock().unwrap().insert(pubkey, Zeroizing::new(secret.secret_bytes()));
		Ok(pubkey)
	}

	/// Decrypts a previously-created key by name and caches it in memory,
	/// for the case where the key was created in an earlier process run.
	pub fn unlock_key(&self, name: &str, passphrase: &str) -> Result<XOnlyPublicKey, AgentError> {
		let entry = self
			.kv
			.get::<EncryptedSecret>(self.keystore_ns, name.as_bytes())
			.map_err(|e| AgentError::Corruption(e.to_string()))?
			.ok_or_else(|| AgentError::FatalInit(anyhow::anyhow!("no key named {name}")))?;
		let secret_bytes = keystore::decrypt(passphrase, &entry)?;
		let secret = SecretKey::from_slice(&secret_bytes)
			.map_err(|e| AgentError::Corruption(format!("stored key bytes invalid: {e}")))?;
		let pubkey = Keypair::from_secret_key(&self.secp, &secret).x_only_public_key().0;
		self.loaded.lock().unwrap().insert(pubkey, Zeroizing::new(secret_bytes));
		Ok(pubkey)
	}

	/// Looks up the name a key was created under from the reverse index
	/// `create_key` writes alongside the encrypted secret, so a caller that
	/// only has a pubkey (e.g. from a [`FinalityProviderRecord`]) can still
	/// find the keystore entry to unlock.
	pub fn name_for_pk(&self, btc_pk: &XOnlyPublicKey) -> Result<String, AgentError> {
		self.kv
			.get::<String>(self.keystore_ns, &pk_index_key(btc_pk))
			.map_err(|e| AgentError::Corruption(e.to_string()))?
			.ok_or_else(|| AgentError::DataMissing {
				btc_pk: *btc_pk,
				chain_id: String::new(),
				height: 0,
				what: "key name for pubkey",
			})
	}

	fn loaded_secret(&self, btc_pk: &XOnlyPublicKey) -> Result<SecretKey, AgentError> {
		let guard = self.loaded.lock().unwrap();
		let bytes = guard.get(btc_pk).ok_or_else(|| {
			AgentError::FatalInit(anyhow::anyhow!("key {btc_pk} is not loaded; call create_key or unlock_key first"))
		})?;
		Ok(SecretKey::from_slice(&**bytes).expect("cached secret is always 32 valid bytes"))
	}

	/// Derives `num` consecutive nonce scalars starting at `start_height`
	/// for `btc_pk` on `chain_id`, persists each one to the nonce store,
	/// and returns the public x-coordinates the commitment's Merkle tree is
	/// built over (spec.md §4.B / §4.E step 4).
	///
	/// Re-running this for a batch that was already derived and stored (but
	/// not yet consumed) is safe: [`NonceStore::insert_batch`] treats a
	/// byte-identical re-derivation as a no-op.
	pub fn derive_pub_rand_list(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
		start_height: u64,
		num: u64,
	) -> Result<Vec<[u8; 32]>, AgentError> {
		let provider_secret = self.loaded_secret(&btc_pk)?;

		let mut entries = Vec::with_capacity(num as usize);
		let mut publics = Vec::with_capacity(num as usize);
		for offset in 0..num {
			let height = start_height + offset;
			let nonce_secret = crypto::derive_nonce_scalar(&provider_secret, chain_id, height);
			publics.push(crypto::public_nonce_x(&self.secp, &nonce_secret));
			entries.push((NonceKey::new(btc_pk, chain_id, height), nonce_secret));
		}

		self.nonce_store.insert_batch(&entries).map_err(|e| {
			e.into_agent_error(btc_pk, chain_id.to_string(), start_height)
		})?;

		Ok(publics)
	}

	/// Produces an EOTS signature over `message_digest` at `height` using
	/// the nonce committed for that height, then atomically marks the nonce
	/// consumed. If marking fails (a different digest was already
	/// consumed), the freshly-computed signature is discarded and
	/// [`AgentError::EquivocationAttempt`] is returned instead — this
	/// function never hands back a signature for a nonce it failed to
	/// mark (spec.md §5).
	pub fn sign_eots(
		&self,
		btc_pk: XOnlyPublicKey,
		chain_id: &str,
		height: u64,
		message_digest: [u8; 32],
	) -> Result<crypto::Signature, AgentError> {
		let provider_secret = self.loaded_secret(&btc_pk)?;
		let key = NonceKey::new(btc_pk, chain_id, height);
		let nonce_secret = self
			.nonce_store
			.get(&key)
			.map_err(|e| e.into_agent_error(btc_pk, chain_id.to_string(), height))?;

		let signature = crypto::sign_eots(&self.secp, &provider_secret, &nonce_secret, &message_digest);

		self.nonce_store
			.mark_consumed(&key, message_digest)
			.map_err(|e| e.into_agent_error(btc_pk, chain_id.to_string(), height))?;

		Ok(signature)
	}

	/// BIP-340 Schnorr signing with a fresh internal nonce, used for the
	/// commitment signature itself rather than a per-height finality vote.
	pub fn sign_schnorr(
		&self,
		btc_pk: XOnlyPublicKey,
		message_digest: [u8; 32],
	) -> Result<crypto::Signature, AgentError> {
		let provider_secret = self.loaded_secret(&btc_pk)?;
		Ok(crypto::sign_schnorr(&self.secp, &provider_secret, &message_digest))
	}
}

fn pk_index_key(pk: &XOnlyPublicKey) -> Vec<u8> {
	let mut out = b"by-pk/".to_vec();
	out.extend_from_slice(&pk.serialize());
	out
}

fn rand_bytes<const N: usize>() -> [u8; N] {
	use rand::RngCore;
	let mut out = [0u8; N];
	rand::thread_rng().fill_bytes(&mut out);
	out
}
