use std::{
	collections::HashMap,
	fs, io,
	path::PathBuf,
	sync::{Arc, RwLock}
};
use log::warn;

use super::error::KvError;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// Bucket interface shared by the storage backends
pub trait KVStore {
	fn get(&self, key: &Key) -> Option<Value>;
	fn put(&self, key: Key, value: Value) -> Result<(), KvError>;
	fn remove(&self, key: &Key);
	/// Atomically remove and return every entry whose key matches
	fn take_matching(&self, matches: &dyn Fn(&Key) -> bool) -> HashMap<Key, Value>;
	/// Entries rendered for display: key bytes plus a human-readable payload reference
	fn snapshot(&self) -> Vec<(Key, String)>;
}

/// A node's local bucket, either held in memory or spilled to
/// a per-node directory of files.
#[derive(Clone)]
pub enum DataStore {
	Memory(MemoryStore),
	Disk(DiskStore)
}

impl DataStore {
	pub fn in_memory() -> Self {
		DataStore::Memory(MemoryStore::new())
	}

	pub fn on_disk(dir: PathBuf) -> io::Result<Self> {
		Ok(DataStore::Disk(DiskStore::open(dir)?))
	}

	/// Merge transferred entries into the bucket; incoming values win.
	pub fn merge(&self, entries: HashMap<Key, Value>) {
		for (key, value) in entries {
			if let Err(e) = self.put(key, value) {
				warn!("failed to merge transferred entry: {}", e);
			}
		}
	}

	/// Remove and return the whole bucket.
	pub fn drain(&self) -> HashMap<Key, Value> {
		self.take_matching(&|_| true)
	}

	fn inner(&self) -> &dyn KVStore {
		match self {
			DataStore::Memory(s) => s,
			DataStore::Disk(s) => s
		}
	}
}

impl KVStore for DataStore {
	fn get(&self, key: &Key) -> Option<Value> {
		self.inner().get(key)
	}

	fn put(&self, key: Key, value: Value) -> Result<(), KvError> {
		self.inner().put(key, value)
	}

	fn remove(&self, key: &Key) {
		self.inner().remove(key)
	}

	fn take_matching(&self, matches: &dyn Fn(&Key) -> bool) -> HashMap<Key, Value> {
		self.inner().take_matching(matches)
	}

	fn snapshot(&self) -> Vec<(Key, String)> {
		self.inner().snapshot()
	}
}

/// Thread-safe in-memory key-value store
#[derive(Clone)]
pub struct MemoryStore {
	data: Arc<RwLock<HashMap<Key, Value>>>
}

impl MemoryStore {
	pub fn new() -> Self {
		MemoryStore {
			data: Arc::new(RwLock::new(HashMap::new()))
		}
	}
}

impl KVStore for MemoryStore {
	fn get(&self, key: &Key) -> Option<Value> {
		self.data.read().unwrap().get(key).cloned()
	}

	fn put(&self, key: Key, value: Value) -> Result<(), KvError> {
		self.data.write().unwrap().insert(key, value);
		Ok(())
	}

	fn remove(&self, key: &Key) {
		self.data.write().unwrap().remove(key);
	}

	fn take_matching(&self, matches: &dyn Fn(&Key) -> bool) -> HashMap<Key, Value> {
		let mut data = self.data.write().unwrap();
		let moved: Vec<Key> = data.keys().filter(|k| matches(k)).cloned().collect();
		moved
			.into_iter()
			.filter_map(|k| data.remove_entry(&k))
			.collect()
	}

	fn snapshot(&self) -> Vec<(Key, String)> {
		self.data
			.read()
			.unwrap()
			.iter()
			.map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
			.collect()
	}
}

/// Key-value store backed by one file per entry in a per-node directory.
///
/// File names are the hex-encoded key, so the index can be rebuilt from
/// the directory on startup.
#[derive(Clone)]
pub struct DiskStore {
	dir: PathBuf,
	index: Arc<RwLock<HashMap<Key, PathBuf>>>
}

impl DiskStore {
	pub fn open(dir: PathBuf) -> io::Result<Self> {
		fs::create_dir_all(&dir)?;
		let mut index = HashMap::new();
		for entry in fs::read_dir(&dir)? {
			let path = entry?.path();
			let name = match path.file_name().and_then(|n| n.to_str()) {
				Some(n) => n,
				None => continue
			};
			match hex::decode(name) {
				Ok(key) => {
					index.insert(key, path);
				},
				Err(_) => warn!("ignoring stray file in bucket dir: {}", path.display())
			};
		}
		Ok(DiskStore {
			dir,
			index: Arc::new(RwLock::new(index))
		})
	}
}

impl KVStore for DiskStore {
	fn get(&self, key: &Key) -> Option<Value> {
		let path = self.index.read().unwrap().get(key).cloned()?;
		match fs::read(&path) {
			Ok(value) => Some(value),
			Err(e) => {
				warn!("failed to read {}: {}", path.display(), e);
				None
			}
		}
	}

	fn put(&self, key: Key, value: Value) -> Result<(), KvError> {
		let path = self.dir.join(hex::encode(&key));
		let tmp = path.with_extension("tmp");
		let written = fs::write(&tmp, &value).and_then(|_| fs::rename(&tmp, &path));
		if let Err(e) = written {
			// drop the partial file before replying
			let _ = fs::remove_file(&tmp);
			return Err(KvError::WriteFailed {
				message: e.to_string()
			});
		}
		self.index.write().unwrap().insert(key, path);
		Ok(())
	}

	fn remove(&self, key: &Key) {
		if let Some(path) = self.index.write().unwrap().remove(key) {
			if let Err(e) = fs::remove_file(&path) {
				warn!("failed to remove {}: {}", path.display(), e);
			}
		}
	}

	fn take_matching(&self, matches: &dyn Fn(&Key) -> bool) -> HashMap<Key, Value> {
		let mut index = self.index.write().unwrap();
		let moved: Vec<Key> = index.keys().filter(|k| matches(k)).cloned().collect();
		let mut taken = HashMap::new();
		for key in moved {
			let path = match index.remove(&key) {
				Some(p) => p,
				None => continue
			};
			match fs::read(&path) {
				Ok(value) => {
					let _ = fs::remove_file(&path);
					taken.insert(key, value);
				},
				Err(e) => warn!("failed to read {} for transfer: {}", path.display(), e)
			};
		}
		taken
	}

	fn snapshot(&self) -> Vec<(Key, String)> {
		self.index
			.read()
			.unwrap()
			.iter()
			.map(|(k, p)| (k.clone(), p.display().to_string()))
			.collect()
	}
}
