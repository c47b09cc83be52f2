use std::{
	borrow::Cow,
	cell::Ref,
	fmt::{self, Debug, Formatter},
	rc::Rc,
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
	storage::{Storage, StorageError},
	store::Node,
	traits::private::Sealed,
	Changes, ListenableCell, Source, Store, Subscription,
};

/// A [`ListenableCell`] mirrored into a [`Storage`] backend under a string key.
///
/// The value is loaded once on creation (falling back to the initial value if the key is absent)
/// and written through on every write. Values are stored as JSON.
///
/// A write that can't be persisted changes nothing and notifies nobody.
pub struct PersistentCell<T> {
	cell: ListenableCell<T>,
	persistence: Rc<Persistence<T>>,
}

struct Persistence<T> {
	key: String,
	storage: Rc<dyn Storage>,
	initial_value: T,
}

impl<T> Clone for PersistentCell<T> {
	fn clone(&self) -> Self {
		Self {
			cell: self.cell.clone(),
			persistence: Rc::clone(&self.persistence),
		}
	}
}

impl<T: Debug> Debug for PersistentCell<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("PersistentCell")
			.field("key", &self.persistence.key)
			.field("cell", &self.cell)
			.finish_non_exhaustive()
	}
}

impl<T: 'static + Clone + Serialize + DeserializeOwned> PersistentCell<T> {
	/// Creates a cell persisted under `key` in the `store`'s default storage.
	///
	/// # Errors
	///
	/// Iff the key can't be read or its stored text doesn't decode as `T`.
	pub fn new(store: &Store, key: impl Into<String>, initial_value: T) -> Result<Self, StorageError> {
		Self::with_storage(store, store.storage(), key, initial_value, None)
	}

	/// As [`new`](`Self::new`), with a label for logs and [`Debug`] output.
	///
	/// # Errors
	///
	/// As [`new`](`Self::new`).
	pub fn labeled(
		store: &Store,
		key: impl Into<String>,
		initial_value: T,
		label: impl Into<Cow<'static, str>>,
	) -> Result<Self, StorageError> {
		Self::with_storage(store, store.storage(), key, initial_value, Some(label.into()))
	}

	/// Creates a cell persisted under `key` in an explicitly given `storage`.
	///
	/// # Errors
	///
	/// As [`new`](`Self::new`).
	pub fn with_storage(
		store: &Store,
		storage: Rc<dyn Storage>,
		key: impl Into<String>,
		initial_value: T,
		label: Option<Cow<'static, str>>,
	) -> Result<Self, StorageError> {
		let persistence = Persistence {
			key: key.into(),
			storage,
			initial_value,
		};
		let loaded = persistence.load()?;
		debug!(key = %persistence.key, found = loaded.is_some(), "loaded persistent cell");

		let value = loaded.unwrap_or_else(|| persistence.initial_value.clone());
		let cell = match label {
			Some(label) => ListenableCell::labeled(store, value, label),
			None => ListenableCell::new(store, value),
		};
		Ok(Self {
			cell,
			persistence: Rc::new(persistence),
		})
	}

	/// Persists `value`, then commits it and notifies listeners.
	///
	/// # Errors
	///
	/// Iff encoding or storing fails. The cell is unchanged in that case.
	pub fn set(&self, value: T) -> Result<(), StorageError> {
		self.persistence.store(&value)?;
		self.cell.set(value);
		Ok(())
	}

	/// Computes the next value from the current one, then proceeds as [`set`](`Self::set`).
	///
	/// # Errors
	///
	/// As [`set`](`Self::set`).
	pub fn update(&self, update: impl FnOnce(&T) -> T) -> Result<(), StorageError> {
		let next = update(&self.cell.read());
		self.set(next)
	}

	/// Like [`update`](`Self::update`), with a fallible `update`.
	///
	/// # Errors
	///
	/// Iff `update` fails or persisting fails. The cell is unchanged in either case.
	pub fn try_update<E: From<StorageError>>(
		&self,
		update: impl FnOnce(&T) -> Result<T, E>,
	) -> Result<(), E> {
		let next = update(&self.cell.read())?;
		self.set(next).map_err(E::from)
	}

	/// Removes the key from storage and returns to the initial value, notifying listeners.
	///
	/// # Errors
	///
	/// Iff the key can't be removed. The cell is unchanged in that case.
	pub fn reset(&self) -> Result<(), StorageError> {
		self.persistence
			.storage
			.remove_item(&self.persistence.key)?;
		debug!(key = %self.persistence.key, "reset persistent cell");
		self.cell.set(self.persistence.initial_value.clone());
		Ok(())
	}

	/// Reads the key again, for when something else wrote to the storage.
	///
	/// Listeners are notified iff the stored value differs from the current one.
	/// An absent key reads as the initial value. Returns whether the value changed.
	///
	/// # Errors
	///
	/// Iff the key can't be read or doesn't decode as `T`. The cell is unchanged in that case.
	pub fn reload(&self) -> Result<bool, StorageError>
	where
		T: PartialEq,
	{
		let stored = self
			.persistence
			.load()?
			.unwrap_or_else(|| self.persistence.initial_value.clone());
		let changed = *self.cell.read() != stored;
		if changed {
			debug!(key = %self.persistence.key, "reloaded persistent cell");
			self.cell.set(stored);
		}
		Ok(changed)
	}

	/// The key this cell is persisted under.
	#[must_use]
	pub fn key(&self) -> &str {
		&self.persistence.key
	}

	/// The storage backend this cell writes into.
	#[must_use]
	pub fn storage(&self) -> &Rc<dyn Storage> {
		&self.persistence.storage
	}

	/// The value used while the key is absent.
	#[must_use]
	pub fn initial_value(&self) -> &T {
		&self.persistence.initial_value
	}

	/// The [`Store`] this cell was created in.
	#[must_use]
	pub fn store(&self) -> &Store {
		self.cell.store()
	}

	/// Registers `listener`, to be called with `(new, previous)` after each committed write.
	pub fn subscribe(&self, listener: impl 'static + Fn(&T, &T)) -> Subscription {
		self.cell.subscribe(listener)
	}

	/// A [`Stream`](`futures_lite::Stream`) of each following change.
	pub fn changes(&self) -> Changes<T> {
		self.cell.changes()
	}

	/// Number of currently registered listeners.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.cell.listener_count()
	}
}

impl<T: Serialize + DeserializeOwned> Persistence<T> {
	fn load(&self) -> Result<Option<T>, StorageError> {
		self.storage
			.get_item(&self.key)?
			.map(|text| {
				serde_json::from_str(&text).map_err(|source| StorageError::Codec {
					key: self.key.clone(),
					source,
				})
			})
			.transpose()
	}

	fn store(&self, value: &T) -> Result<(), StorageError> {
		let text = serde_json::to_string(value).map_err(|source| StorageError::Codec {
			key: self.key.clone(),
			source,
		})?;
		self.storage.set_item(&self.key, &text)
	}
}

impl<T> Sealed for PersistentCell<T> {
	fn node(&self) -> &Rc<Node> {
		self.cell.node()
	}
}

impl<T> Source for PersistentCell<T> {
	type Output = T;

	fn read(&self) -> Ref<'_, T> {
		self.cell.read()
	}
}
