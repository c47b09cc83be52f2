use std::{
	borrow::Cow,
	cell::{Cell, Ref, RefCell},
	collections::VecDeque,
	fmt::{self, Debug, Formatter},
	rc::{Rc, Weak},
};

use scopeguard::guard;
use tap::Pipe;
use tracing::{debug, trace};

use crate::{
	store::Node,
	subscription::{Detach, ListenerId, Registry},
	traits::private::Sealed,
	Changes, Source, Store, Subscription,
};

pub(crate) type Listener<T> = dyn Fn(&T, &T);

/// A mutable value that notifies its listeners of every write.
///
/// Cheap to clone; clones refer to the same cell.
///
/// Listeners run synchronously inside the write, in registration order,
/// with `(new, previous)`. Derived cells that read this one are settled afterwards,
/// still within the same call.
///
/// A listener may write to the cell it listens to. That write is committed immediately,
/// but its notification is queued behind the one currently being dispatched.
pub struct ListenableCell<T> {
	inner: Rc<RawListenableCell<T>>,
}

pub(crate) struct RawListenableCell<T> {
	node: Rc<Node>,
	value: RefCell<Rc<T>>,
	listeners: Registry<Listener<T>>,
	dispatching: Cell<bool>,
	pending: RefCell<VecDeque<(Rc<T>, Rc<T>)>>,
}

impl<T> Clone for ListenableCell<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Rc::clone(&self.inner),
		}
	}
}

impl<T: Debug> Debug for ListenableCell<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut debug = f.debug_struct("ListenableCell");
		debug.field("node", &format_args!("{}", self.inner.node));
		match self.inner.value.try_borrow() {
			Ok(value) => debug.field("value", &**value),
			Err(_) => debug.field("value", &"(writing)"),
		};
		debug
			.field("listeners", &self.inner.listeners)
			.field("pending", &self.inner.pending.borrow().len())
			.finish()
	}
}

impl<T: 'static> ListenableCell<T> {
	/// Creates an unlabelled cell in `store`.
	pub fn new(store: &Store, initial_value: T) -> Self {
		Self::with_label(store, initial_value, None)
	}

	/// Creates a cell in `store` that carries `label` in logs and [`Debug`] output.
	pub fn labeled(store: &Store, initial_value: T, label: impl Into<Cow<'static, str>>) -> Self {
		Self::with_label(store, initial_value, Some(label.into()))
	}

	fn with_label(store: &Store, initial_value: T, label: Option<Cow<'static, str>>) -> Self {
		RawListenableCell {
			node: Node::new(store, label),
			value: RefCell::new(Rc::new(initial_value)),
			listeners: Registry::new(),
			dispatching: Cell::new(false),
			pending: RefCell::new(VecDeque::new()),
		}
		.pipe(Rc::new)
		.pipe(|inner| Self { inner })
	}

	/// The [`Store`] this cell was created in.
	#[must_use]
	pub fn store(&self) -> &Store {
		self.inner.node.store()
	}

	/// Replaces the value and notifies listeners with `(value, previous)`.
	///
	/// # Panics
	///
	/// Iff a listener panics, after which the remaining listeners and queued notifications
	/// are skipped.
	pub fn set(&self, value: T) {
		self.inner.commit(value);
	}

	/// Computes the next value from the current one, then proceeds as [`set`](`Self::set`).
	///
	/// # Panics
	///
	/// As [`set`](`Self::set`), and iff `update` panics (before anything changed).
	pub fn update(&self, update: impl FnOnce(&T) -> T) {
		let next = update(&*self.read());
		self.inner.commit(next);
	}

	/// Like [`update`](`Self::update`), but leaves the cell untouched and notifies nobody
	/// if `update` fails.
	///
	/// # Errors
	///
	/// Iff `update` returns [`Err`].
	pub fn try_update<E>(&self, update: impl FnOnce(&T) -> Result<T, E>) -> Result<(), E> {
		let next = update(&*self.read())?;
		self.inner.commit(next);
		Ok(())
	}

	/// Registers `listener`, to be called with `(new, previous)` after each write.
	///
	/// Registering the same closure twice yields two independent [`Subscription`]s.
	pub fn subscribe(&self, listener: impl 'static + Fn(&T, &T)) -> Subscription {
		self.subscribe_rc(Rc::new(listener))
	}

	pub(crate) fn subscribe_rc(&self, listener: Rc<Listener<T>>) -> Subscription {
		let id = self.inner.listeners.insert(listener);
		debug!(cell = %self.inner.node, listener = ?id, "subscribed");
		let target: Weak<dyn Detach> = Rc::downgrade(&self.inner) as Weak<dyn Detach>;
		Subscription::new(target, id)
	}

	/// A [`Stream`](`futures_lite::Stream`) of each following change.
	pub fn changes(&self) -> Changes<T>
	where
		T: Clone,
	{
		Changes::new(|listener| self.subscribe_rc(Rc::from(listener)))
	}

	/// Number of currently registered listeners.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.inner.listeners.len()
	}
}

impl<T> RawListenableCell<T> {
	fn commit(&self, next: T) {
		let next = Rc::new(next);
		let previous = self.value.replace(Rc::clone(&next));
		// Before dispatch, so dependents go stale even if a listener panics.
		self.node.invalidate_dependents();
		self.pending.borrow_mut().push_back((next, previous));

		if self.dispatching.replace(true) {
			trace!(cell = %self.node, "write queued behind running dispatch");
			return;
		}
		{
			let _dispatching = guard(self, |this| {
				this.dispatching.set(false);
				this.pending.borrow_mut().clear();
			});
			loop {
				let next = self.pending.borrow_mut().pop_front();
				let Some((current, previous)) = next else {
					break;
				};
				let listeners = self.listeners.snapshot();
				trace!(cell = %self.node, listeners = listeners.len(), "write");
				for listener in listeners {
					listener(&*current, &*previous);
				}
			}
		}
		self.node.store().flush();
	}
}

impl<T> Detach for RawListenableCell<T> {
	fn detach(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	fn is_attached(&self, id: ListenerId) -> bool {
		self.listeners.contains(id)
	}
}

impl<T> Sealed for ListenableCell<T> {
	fn node(&self) -> &Rc<Node> {
		&self.inner.node
	}
}

impl<T> Source for ListenableCell<T> {
	type Output = T;

	fn read(&self) -> Ref<'_, T> {
		Ref::map(self.inner.value.borrow(), |value| &**value)
	}
}
