//! The explicit registry all cells are created from.
//!
//! A [`Store`] allocates cell ids in creation order, owns the default storage backend
//! and queues derived cells whose dependencies changed. Derived cells are settled
//! in id order, so a derived cell always settles after the cells it was created from.

use std::{
	borrow::Cow,
	cell::{Cell, RefCell},
	collections::BTreeMap,
	fmt::{self, Debug, Display, Formatter},
	rc::{Rc, Weak},
};

use scopeguard::guard;
use tracing::{debug, trace};

use crate::storage::{MemoryStorage, Storage};

pub(crate) type CellId = u64;

/// Receives invalidation from the cells it read during its last computation.
pub(crate) trait Dependent {
	/// Called as soon as a dependency changed. Must not run user code.
	fn mark_stale(&self);

	/// Called once per flush, in id order.
	fn settle(&self);
}

/// Shared cell state the store needs to see: identity, label and dependents.
pub struct Node {
	id: CellId,
	label: Option<Cow<'static, str>>,
	store: Store,
	dependents: RefCell<BTreeMap<CellId, Weak<dyn Dependent>>>,
}

impl Node {
	pub(crate) fn new(store: &Store, label: Option<Cow<'static, str>>) -> Rc<Self> {
		Rc::new(Self {
			id: store.allocate_id(),
			label,
			store: store.clone(),
			dependents: RefCell::new(BTreeMap::new()),
		})
	}

	pub(crate) fn id(&self) -> CellId {
		self.id
	}

	pub(crate) fn label(&self) -> Option<&str> {
		self.label.as_deref()
	}

	pub(crate) fn store(&self) -> &Store {
		&self.store
	}

	pub(crate) fn add_dependent(&self, id: CellId, dependent: Weak<dyn Dependent>) {
		self.dependents.borrow_mut().entry(id).or_insert(dependent);
	}

	pub(crate) fn remove_dependent(&self, id: CellId) {
		self.dependents.borrow_mut().remove(&id);
	}

	/// Marks all current dependents stale and queues them for the next flush.
	pub(crate) fn invalidate_dependents(&self) {
		let dependents: Vec<_> = {
			let mut dependents = self.dependents.borrow_mut();
			dependents.retain(|_, dependent| dependent.strong_count() > 0);
			dependents
				.iter()
				.map(|(id, dependent)| (*id, Weak::clone(dependent)))
				.collect()
		};
		self.store.enqueue(dependents);
	}
}

impl Display for Node {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match &self.label {
			Some(label) => write!(f, "{label}#{}", self.id),
			None => write!(f, "#{}", self.id),
		}
	}
}

impl Debug for Node {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Node")
			.field("id", &self.id)
			.field("label", &self.label)
			.field("dependents", &self.dependents.borrow().keys())
			.finish_non_exhaustive()
	}
}

/// Registry and propagation context shared by a group of cells.
///
/// Cheap to clone; clones refer to the same store.
/// Create one centrally and pass it to whatever creates cells.
#[derive(Clone)]
pub struct Store {
	inner: Rc<StoreInner>,
}

struct StoreInner {
	id_counter: Cell<CellId>,
	storage: Rc<dyn Storage>,
	stale_queue: RefCell<BTreeMap<CellId, Weak<dyn Dependent>>>,
	flushing: Cell<bool>,
}

impl Default for Store {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for Store {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Store")
			.field("cells", &self.inner.id_counter.get())
			.field("stale_queue", &self.inner.stale_queue.borrow().keys())
			.field("flushing", &self.inner.flushing.get())
			.finish_non_exhaustive()
	}
}

impl Store {
	/// Creates a [`Store`] that persists into a fresh [`MemoryStorage`].
	#[must_use]
	pub fn new() -> Self {
		Self::with_storage(MemoryStorage::new())
	}

	/// Creates a [`Store`] whose persistent cells default to `storage`.
	#[must_use]
	pub fn with_storage(storage: impl 'static + Storage) -> Self {
		Self {
			inner: Rc::new(StoreInner {
				id_counter: Cell::new(0),
				storage: Rc::new(storage),
				stale_queue: RefCell::new(BTreeMap::new()),
				flushing: Cell::new(false),
			}),
		}
	}

	/// The default storage backend of this store.
	#[must_use]
	pub fn storage(&self) -> Rc<dyn Storage> {
		Rc::clone(&self.inner.storage)
	}

	/// How many cells were created from this store so far.
	#[must_use]
	pub fn cell_count(&self) -> u64 {
		self.inner.id_counter.get()
	}

	/// Whether `self` and `other` are the same store.
	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	fn allocate_id(&self) -> CellId {
		let id = self.inner.id_counter.get();
		self.inner.id_counter.set(id + 1);
		id
	}

	pub(crate) fn enqueue(&self, dependents: Vec<(CellId, Weak<dyn Dependent>)>) {
		for (id, dependent) in dependents {
			let Some(strong) = dependent.upgrade() else {
				continue;
			};
			strong.mark_stale();
			self.schedule(id, dependent);
		}
	}

	/// Queues `dependent` to be settled by the next flush, without marking it stale.
	pub(crate) fn schedule(&self, id: CellId, dependent: Weak<dyn Dependent>) {
		self.inner.stale_queue.borrow_mut().insert(id, dependent);
	}

	/// Settles queued derived cells until the queue is empty.
	///
	/// Nested calls (from listeners that write while a flush is running) return immediately;
	/// their changes are picked up by the outer flush.
	pub(crate) fn flush(&self) {
		if self.inner.flushing.replace(true) {
			trace!("flush already running");
			return;
		}
		let _flushing = guard(&self.inner.flushing, |flushing| flushing.set(false));

		let mut settled = 0_usize;
		loop {
			let next = self.inner.stale_queue.borrow_mut().pop_first();
			let Some((_, dependent)) = next else {
				break;
			};
			if let Some(dependent) = dependent.upgrade() {
				dependent.settle();
				settled += 1;
			}
		}
		if settled > 0 {
			debug!(settled, "flushed derived cells");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{Node, Store};

	#[test]
	fn ids_follow_creation_order() {
		let store = Store::new();
		let a = Node::new(&store, None);
		let b = Node::new(&store, Some("b".into()));

		assert!(a.id() < b.id());
		assert_eq!(store.cell_count(), 2);
		assert_eq!(a.to_string(), "#0");
		assert_eq!(b.to_string(), "b#1");
		assert!(a.store().ptr_eq(&store));
		assert!(!store.ptr_eq(&Store::new()));
	}
}
