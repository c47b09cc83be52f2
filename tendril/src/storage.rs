//! Key-value backends for [`PersistentCell`](`crate::PersistentCell`)s.
//!
//! Backends store text under string keys, much like web storage.
//! Values are encoded as JSON by the cell before they reach the backend.

use std::{cell::RefCell, collections::BTreeMap, io, rc::Rc};

#[cfg(feature = "file_storage")]
use std::{fs, path::PathBuf};

use thiserror::Error;

/// Everything that can go wrong while persisting or loading a value.
#[derive(Debug, Error)]
pub enum StorageError {
	/// The backend failed to read or write.
	#[error("storage I/O failed for key `{key}`")]
	Io {
		/// The key being accessed.
		key: String,
		/// The underlying failure.
		#[source]
		source: io::Error,
	},

	/// The stored text isn't valid for the cell's value type, or the value couldn't be encoded.
	#[error("could not encode or decode the value stored under `{key}`")]
	Codec {
		/// The key being accessed.
		key: String,
		/// The underlying failure.
		#[source]
		source: serde_json::Error,
	},

	/// The backend can't represent this key.
	#[error("`{key}` is not a valid storage key")]
	InvalidKey {
		/// The rejected key.
		key: String,
	},

	/// A custom backend refused the operation.
	#[error("storage backend rejected key `{key}`: {message}")]
	Rejected {
		/// The key being accessed.
		key: String,
		/// Backend-specific explanation.
		message: String,
	},
}

/// A string-keyed, string-valued storage medium.
///
/// All access is synchronous. Errors are passed through to whoever wrote or created the cell.
pub trait Storage {
	/// Returns the text stored under `key`, if any.
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

	/// Stores `value` under `key`, replacing what was there.
	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

	/// Removes `key`. Removing an absent key is not an error.
	fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: ?Sized + Storage> Storage for Rc<S> {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		(**self).get_item(key)
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		(**self).set_item(key, value)
	}

	fn remove_item(&self, key: &str) -> Result<(), StorageError> {
		(**self).remove_item(key)
	}
}

/// In-process [`Storage`]. Clones share their contents.
///
/// This is what [`Store::new`](`crate::Store::new`) persists into.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
	items: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStorage {
	/// Creates an empty [`MemoryStorage`].
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored keys.
	#[must_use]
	pub fn len(&self) -> usize {
		self.items.borrow().len()
	}

	/// Whether nothing is stored.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.borrow().is_empty()
	}

	/// Whether `key` is present.
	#[must_use]
	pub fn contains_key(&self, key: &str) -> bool {
		self.items.borrow().contains_key(key)
	}
}

impl Storage for MemoryStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.items.borrow().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.items
			.borrow_mut()
			.insert(key.to_owned(), value.to_owned());
		Ok(())
	}

	fn remove_item(&self, key: &str) -> Result<(), StorageError> {
		self.items.borrow_mut().remove(key);
		Ok(())
	}
}

/// [`Storage`] that keeps each key in its own `<key>.json` file inside a directory.
///
/// The directory is created on first write. Keys may only contain ASCII letters, digits,
/// `-`, `_` and `.`, and must not start with `.`.
#[cfg(feature = "file_storage")]
#[derive(Debug, Clone)]
pub struct FileStorage {
	directory: PathBuf,
}

#[cfg(feature = "file_storage")]
impl FileStorage {
	/// Creates a [`FileStorage`] rooted at `directory`. Doesn't touch the file system yet.
	pub fn new(directory: impl Into<PathBuf>) -> Self {
		Self {
			directory: directory.into(),
		}
	}

	/// The directory this storage writes into.
	#[must_use]
	pub fn directory(&self) -> &std::path::Path {
		&self.directory
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
		let valid = !key.is_empty()
			&& !key.starts_with('.')
			&& key
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
		if valid {
			Ok(self.directory.join(format!("{key}.json")))
		} else {
			Err(StorageError::InvalidKey {
				key: key.to_owned(),
			})
		}
	}
}

#[cfg(feature = "file_storage")]
impl Storage for FileStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		match fs::read_to_string(self.path_for(key)?) {
			Ok(text) => Ok(Some(text)),
			Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(StorageError::Io {
				key: key.to_owned(),
				source,
			}),
		}
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let path = self.path_for(key)?;
		let io_error = |source| StorageError::Io {
			key: key.to_owned(),
			source,
		};

		fs::create_dir_all(&self.directory).map_err(io_error)?;
		// Write beside the target and rename, so readers never see half a value.
		let partial = path.with_extension("json.partial");
		fs::write(&partial, value).map_err(io_error)?;
		fs::rename(&partial, &path).map_err(io_error)
	}

	fn remove_item(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.path_for(key)?) {
			Ok(()) => Ok(()),
			Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(source) => Err(StorageError::Io {
				key: key.to_owned(),
				source,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{MemoryStorage, Storage};

	#[test]
	fn memory_clones_share_contents() {
		let storage = MemoryStorage::new();
		let other = storage.clone();

		storage.set_item("k", "5").unwrap();
		assert_eq!(other.get_item("k").unwrap().as_deref(), Some("5"));

		other.remove_item("k").unwrap();
		other.remove_item("k").unwrap();
		assert!(storage.is_empty());
	}

	#[cfg(feature = "file_storage")]
	#[test]
	fn file_round_trip_and_key_validation() {
		use super::{FileStorage, StorageError};

		let directory = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(directory.path().join("state"));

		assert_eq!(storage.get_item("theme").unwrap(), None);
		storage.set_item("theme", "\"dark\"").unwrap();
		assert_eq!(
			storage.get_item("theme").unwrap().as_deref(),
			Some("\"dark\"")
		);
		assert!(directory.path().join("state/theme.json").is_file());

		storage.remove_item("theme").unwrap();
		storage.remove_item("theme").unwrap();
		assert_eq!(storage.get_item("theme").unwrap(), None);

		for key in ["", ".hidden", "../escape", "a/b"] {
			assert!(matches!(
				storage.set_item(key, "0"),
				Err(StorageError::InvalidKey { .. })
			));
		}
	}
}
