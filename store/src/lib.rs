//! A thin, schema-versioned `rocksdb` key-value store shared by every
//! persistent collection the agent needs (nonces, proofs, finality-provider
//! records).
//!
//! Grounded on the teacher's `PersistentKeyDB` (`engine/src/db/persistent.rs`):
//! one `DATA_COLUMN` holding everything behind a fixed-size key prefix (so a
//! single `rocksdb::Options::set_prefix_extractor` lets RocksDB's own bloom
//! filters and prefix iteration do the work), and a `METADATA_COLUMN`
//! holding only the schema version. Unlike the teacher, this store has no
//! chain-specific migrations (there is exactly one schema version so far);
//! the version byte and the `open_and_migrate` name are kept because a
//! second schema version is the first thing a real deployment of this agent
//! would need, and the teacher's migration path is the idiomatic way this
//! corpus handles that.

use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

mod error;
pub use error::StoreError;

const LATEST_SCHEMA_VERSION: u32 = 1;
const DB_SCHEMA_VERSION_KEY: &[u8] = b"db_schema_version";

/// Every key in `DATA_COLUMN` is logically namespaced by a fixed-width
/// prefix so independent collections (nonces, proofs, fp records) can share
/// one column family and one prefix-iterator bloom filter.
const PREFIX_SIZE: usize = 16;

const DATA_COLUMN: &str = "data";
const METADATA_COLUMN: &str = "metadata";

/// A namespace within the shared store. Callers build one per logical
/// collection (e.g. `Namespace::new(b"nonces")`), which right-pads the tag
/// to [`PREFIX_SIZE`] bytes.
#[derive(Debug, Clone, Copy)]
pub struct Namespace {
	prefix: [u8; PREFIX_SIZE],
}

impl Namespace {
	pub fn new(tag: &[u8]) -> Self {
		assert!(tag.len() <= PREFIX_SIZE, "namespace tag longer than the fixed prefix");
		let mut prefix = [0u8; PREFIX_SIZE];
		prefix[..tag.len()].copy_from_slice(tag);
		Self { prefix }
	}

	fn key_with_prefix(&self, key: &[u8]) -> Vec<u8> {
		[&self.prefix[..], key].concat()
	}
}

pub struct PersistentKv {
	db: DB,
}

impl PersistentKv {
	/// Opens the store at `db_path`, creating it (and its column families)
	/// if it does not exist, and migrating an existing store to the latest
	/// schema version.
	pub fn open_and_migrate(db_path: &Path) -> Result<Self, StoreError> {
		let mut cfopts = Options::default();
		cfopts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_SIZE));

		let cfs = vec![
			ColumnFamilyDescriptor::new(METADATA_COLUMN, Options::default()),
			ColumnFamilyDescriptor::new(DATA_COLUMN, cfopts),
		];

		let mut db_opts = Options::default();
		db_opts.create_missing_column_families(true);
		db_opts.create_if_missing(true);

		let db = DB::open_cf_descriptors(&db_opts, db_path, cfs)
			.map_err(|e| StoreError::Io(e.to_string()))?;

		migrate_to_latest(&db)?;

		Ok(Self { db })
	}

	fn data_cf(&self) -> &ColumnFamily {
		self.db.cf_handle(DATA_COLUMN).expect("data column family must exist")
	}

	/// Writes `value` under `namespace`/`key`, unconditionally overwriting
	/// any existing value. Used where the caller has already decided
	/// overwriting is safe (e.g. updating a finality-provider record).
	pub fn put<T: Serialize>(
		&self,
		namespace: Namespace,
		key: &[u8],
		value: &T,
	) -> Result<(), StoreError> {
		let bytes = bincode::serialize(value).expect("serialization of store values cannot fail");
		self.db
			.put_cf(self.data_cf(), namespace.key_with_prefix(key), bytes)
			.map_err(|e| StoreError::Io(e.to_string()))
	}

	/// Writes `value` under `namespace`/`key` only if no value is already
	/// present. Returns `Ok(false)` (without writing) if one exists.
	pub fn insert_if_absent<T: Serialize>(
		&self,
		namespace: Namespace,
		key: &[u8],
		value: &T,
	) -> Result<bool, StoreError> {
		let full_key = namespace.key_with_prefix(key);
		if self.db.get_cf(self.data_cf(), &full_key).map_err(|e| StoreError::Io(e.to_string()))?.is_some()
		{
			return Ok(false);
		}
		let bytes = bincode::serialize(value).expect("serialization of store values cannot fail");
		self.db
			.put_cf(self.data_cf(), full_key, bytes)
			.map_err(|e| StoreError::Io(e.to_string()))?;
		Ok(true)
	}

	pub fn get<T: DeserializeOwned>(
		&self,
		namespace: Namespace,
		key: &[u8],
	) -> Result<Option<T>, StoreError> {
		self.db
			.get_cf(self.data_cf(), namespace.key_with_prefix(key))
			.map_err(|e| StoreError::Io(e.to_string()))?
			.map(|bytes| {
				bincode::deserialize(&bytes)
					.map_err(|e| StoreError::Corruption(format!("deserialization failed: {e}")))
			})
			.transpose()
	}

	/// Iterates every `(suffix, value)` pair stored under `namespace`,
	/// ordered by key bytes (and therefore, for big-endian height suffixes,
	/// by height).
	pub fn scan_prefix<T: DeserializeOwned>(
		&self,
		namespace: Namespace,
	) -> impl Iterator<Item = Result<(Vec<u8>, T), StoreError>> + '_ {
		self.db
			.prefix_iterator_cf(self.data_cf(), namespace.prefix)
			.map(|result| result.map_err(|e| StoreError::Io(e.to_string())))
			.map(move |result| {
				result.and_then(|(key, value)| {
					let suffix = key[PREFIX_SIZE..].to_vec();
					let value = bincode::deserialize(&value).map_err(|e| {
						StoreError::Corruption(format!("deserialization failed: {e}"))
					})?;
					Ok((suffix, value))
				})
			})
	}
}

fn metadata_cf(db: &DB) -> &ColumnFamily {
	db.cf_handle(METADATA_COLUMN).expect("metadata column family must exist")
}

fn migrate_to_latest(db: &DB) -> Result<(), StoreError> {
	let current = match db
		.get_cf(metadata_cf(db), DB_SCHEMA_VERSION_KEY)
		.map_err(|e| StoreError::Io(e.to_string()))?
	{
		Some(bytes) => {
			let array: [u8; 4] =
				bytes.try_into().map_err(|_| StoreError::Corruption("bad schema version".into()))?;
			u32::from_be_bytes(array)
		},
		None => {
			let mut batch = WriteBatch::default();
			batch.put_cf(metadata_cf(db), DB_SCHEMA_VERSION_KEY, 0u32.to_be_bytes());
			db.write(batch).map_err(|e| StoreError::Io(e.to_string()))?;
			0
		},
	};

	if current > LATEST_SCHEMA_VERSION {
		return Err(StoreError::Corruption(format!(
			"database schema version {current} is ahead of the version this build understands ({LATEST_SCHEMA_VERSION})"
		)));
	}

	if current < LATEST_SCHEMA_VERSION {
		info!(from = current, to = LATEST_SCHEMA_VERSION, "migrating store schema");
		let mut batch = WriteBatch::default();
		batch.put_cf(metadata_cf(db), DB_SCHEMA_VERSION_KEY, LATEST_SCHEMA_VERSION.to_be_bytes());
		db.write(batch).map_err(|e| StoreError::Io(e.to_string()))?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Widget(u64);

	fn open_tmp() -> (tempfile::TempDir, PersistentKv) {
		let dir = tempfile::tempdir().unwrap();
		let kv = PersistentKv::open_and_migrate(&dir.path().join("db")).unwrap();
		(dir, kv)
	}

	#[test]
	fn put_then_get_roundtrips() {
		let (_dir, kv) = open_tmp();
		let ns = Namespace::new(b"widgets");
		kv.put(ns, b"a", &Widget(7)).unwrap();
		assert_eq!(kv.get::<Widget>(ns, b"a").unwrap(), Some(Widget(7)));
		assert_eq!(kv.get::<Widget>(ns, b"missing").unwrap(), None);
	}

	#[test]
	fn insert_if_absent_refuses_overwrite() {
		let (_dir, kv) = open_tmp();
		let ns = Namespace::new(b"widgets");
		assert!(kv.insert_if_absent(ns, b"a", &Widget(1)).unwrap());
		assert!(!kv.insert_if_absent(ns, b"a", &Widget(2)).unwrap());
		assert_eq!(kv.get::<Widget>(ns, b"a").unwrap(), Some(Widget(1)));
	}

	#[test]
	fn namespaces_do_not_collide() {
		let (_dir, kv) = open_tmp();
		let a = Namespace::new(b"a");
		let b = Namespace::new(b"b");
		kv.put(a, b"x", &Widget(1)).unwrap();
		kv.put(b, b"x", &Widget(2)).unwrap();
		assert_eq!(kv.get::<Widget>(a, b"x").unwrap(), Some(Widget(1)));
		assert_eq!(kv.get::<Widget>(b, b"x").unwrap(), Some(Widget(2)));
	}

	#[test]
	fn scan_prefix_orders_by_key_bytes() {
		let (_dir, kv) = open_tmp();
		let ns = Namespace::new(b"heights");
		for h in [3u64, 1, 2] {
			kv.put(ns, &h.to_be_bytes(), &Widget(h)).unwrap();
		}
		let got: Vec<Widget> =
			kv.scan_prefix::<Widget>(ns).map(|r| r.unwrap().1).collect();
		assert_eq!(got, vec![Widget(1), Widget(2), Widget(3)]);
	}

	#[test]
	fn reopening_an_existing_store_migrates_cleanly() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("db");
		{
			let kv = PersistentKv::open_and_migrate(&path).unwrap();
			kv.put(Namespace::new(b"widgets"), b"a", &Widget(42)).unwrap();
		}
		let kv = PersistentKv::open_and_migrate(&path).unwrap();
		assert_eq!(kv.get::<Widget>(Namespace::new(b"widgets"), b"a").unwrap(), Some(Widget(42)));
	}
}
