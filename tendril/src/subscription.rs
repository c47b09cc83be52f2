use std::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	rc::{Rc, Weak},
};

use tracing::debug;

/// Identifies one registration in a cell's listener registry.
///
/// Ids are unique per cell and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered listener registry.
///
/// Entries are appended on registration and removed by [`ListenerId`] only.
pub(crate) struct Registry<E: ?Sized> {
	next_id: Cell<u64>,
	entries: RefCell<Vec<(ListenerId, Rc<E>)>>,
}

impl<E: ?Sized> Registry<E> {
	pub(crate) fn new() -> Self {
		Self {
			next_id: Cell::new(0),
			entries: RefCell::new(Vec::new()),
		}
	}

	pub(crate) fn insert(&self, entry: Rc<E>) -> ListenerId {
		let id = ListenerId(self.next_id.get());
		self.next_id.set(id.0 + 1);
		self.entries.borrow_mut().push((id, entry));
		id
	}

	pub(crate) fn remove(&self, id: ListenerId) -> bool {
		let mut entries = self.entries.borrow_mut();
		match entries.iter().position(|(entry_id, _)| *entry_id == id) {
			Some(index) => {
				entries.remove(index);
				true
			}
			None => false,
		}
	}

	pub(crate) fn contains(&self, id: ListenerId) -> bool {
		self.entries
			.borrow()
			.iter()
			.any(|(entry_id, _)| *entry_id == id)
	}

	/// Clones the current entries in registration order.
	///
	/// Dispatch iterates this copy, so listeners may (un)subscribe while being notified.
	pub(crate) fn snapshot(&self) -> Vec<Rc<E>> {
		self.entries
			.borrow()
			.iter()
			.map(|(_, entry)| Rc::clone(entry))
			.collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.borrow().len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.borrow().is_empty()
	}
}

impl<E: ?Sized> Debug for Registry<E> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_list()
			.entries(self.entries.borrow().iter().map(|(id, _)| id))
			.finish()
	}
}

/// Implemented by cells that hand out [`Subscription`]s.
pub(crate) trait Detach {
	fn detach(&self, id: ListenerId) -> bool;
	fn is_attached(&self, id: ListenerId) -> bool;
}

/// Keeps one listener registered with a cell.
///
/// Dropping the [`Subscription`] removes exactly the registration it was created for,
/// even if the same callback was registered more than once.
/// If the cell is gone already, that's a no-op.
#[must_use = "Subscriptions are cancelled when dropped."]
pub struct Subscription {
	target: Weak<dyn Detach>,
	id: ListenerId,
}

impl Subscription {
	pub(crate) fn new(target: Weak<dyn Detach>, id: ListenerId) -> Self {
		Self { target, id }
	}

	/// The id of the registration this [`Subscription`] keeps alive.
	#[must_use]
	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Whether the listener is still registered.
	///
	/// This is `false` once the cell has been dropped.
	#[must_use]
	pub fn is_attached(&self) -> bool {
		self.target
			.upgrade()
			.is_some_and(|target| target.is_attached(self.id))
	}

	/// Removes the listener now.
	///
	/// Returns whether a registration was removed.
	/// (Equivalent to dropping the [`Subscription`], but reports the outcome.)
	pub fn unsubscribe(self) -> bool {
		self.detach()
	}

	fn detach(&self) -> bool {
		let removed = self
			.target
			.upgrade()
			.is_some_and(|target| target.detach(self.id));
		if removed {
			debug!(listener = ?self.id, "unsubscribed");
		}
		removed
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.detach();
	}
}

impl Debug for Subscription {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("attached", &self.is_attached())
			.finish()
	}
}
