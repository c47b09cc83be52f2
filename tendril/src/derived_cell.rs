use std::{
	borrow::Cow,
	cell::{Cell, Ref, RefCell},
	collections::BTreeMap,
	fmt::{self, Debug, Formatter},
	mem,
	rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{
	store::{CellId, Dependent, Node},
	subscription::{Detach, ListenerId, Registry},
	traits::private::Sealed,
	Changes, Getter, Source, Subscription,
};

/// A read-only value computed from other cells.
///
/// The derivation runs once on creation and again whenever a cell it read changed,
/// either while the write settles (if anyone is subscribed) or on the next read.
///
/// Each [`Subscription`] remembers the last value it was notified about (initially the value
/// at the time of subscribing) and is called only when a recomputation yields something
/// different from *that*. Intermediate values between two recomputations aren't observed.
pub struct DerivedCell<T> {
	inner: Rc<RawDerivedCell<T>>,
}

type Derive<T> = dyn Fn(&Getter) -> T;

struct RawDerivedCell<T> {
	this: Weak<Self>,
	node: Rc<Node>,
	derive: Box<Derive<T>>,
	value: RefCell<T>,
	stale: Cell<bool>,
	dependencies: RefCell<BTreeMap<CellId, Weak<Node>>>,
	listeners: Registry<DerivedListener<T>>,
}

struct DerivedListener<T> {
	callback: Box<dyn Fn(&T, &T)>,
	last_seen: RefCell<T>,
}

impl<T> Clone for DerivedCell<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Rc::clone(&self.inner),
		}
	}
}

impl<T: Debug> Debug for DerivedCell<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut debug = f.debug_struct("DerivedCell");
		debug.field("node", &format_args!("{}", self.inner.node));
		match self.inner.value.try_borrow() {
			Ok(value) => debug.field("value", &*value),
			Err(_) => debug.field("value", &"(recomputing)"),
		};
		debug
			.field("stale", &self.inner.stale.get())
			.field("dependencies", &self.inner.dependencies.borrow().keys())
			.field("listeners", &self.inner.listeners)
			.finish()
	}
}

impl<T: 'static + Clone + PartialEq> DerivedCell<T> {
	/// Derives a cell from `source` in `source`'s store.
	///
	/// `derive` receives a [`Getter`] for reading further cells, and the value of `source`.
	pub fn new<S>(source: &S, derive: impl 'static + Fn(&Getter, &S::Output) -> T) -> Self
	where
		S: 'static + Source + Clone,
	{
		Self::with_label(source, derive, None)
	}

	/// As [`new`](`Self::new`), with a label for logs and [`Debug`] output.
	pub fn labeled<S>(
		source: &S,
		derive: impl 'static + Fn(&Getter, &S::Output) -> T,
		label: impl Into<Cow<'static, str>>,
	) -> Self
	where
		S: 'static + Source + Clone,
	{
		Self::with_label(source, derive, Some(label.into()))
	}

	fn with_label<S>(
		source: &S,
		derive: impl 'static + Fn(&Getter, &S::Output) -> T,
		label: Option<Cow<'static, str>>,
	) -> Self
	where
		S: 'static + Source + Clone,
	{
		let node = Node::new(source.node().store(), label);
		let derive: Box<Derive<T>> = {
			let source = source.clone();
			Box::new(move |getter: &Getter| derive(getter, &*getter.read(&source)))
		};

		let getter = Getter::new();
		let initial_value = derive(&getter);

		let inner = Rc::new_cyclic(|this| RawDerivedCell {
			this: Weak::clone(this),
			node,
			derive,
			value: RefCell::new(initial_value),
			stale: Cell::new(false),
			dependencies: RefCell::new(BTreeMap::new()),
			listeners: Registry::new(),
		});
		inner.rewire(getter.into_dependencies());
		debug!(cell = %inner.node, dependencies = inner.dependencies.borrow().len(), "derived");
		Self { inner }
	}

	/// Registers `listener`, to be called with `(new, last_seen)` whenever a recomputation
	/// yields a value unequal to the one this subscription last saw.
	///
	/// The baseline is the current value.
	pub fn subscribe(&self, listener: impl 'static + Fn(&T, &T)) -> Subscription {
		self.subscribe_boxed(Box::new(listener))
	}

	fn subscribe_boxed(&self, callback: Box<dyn Fn(&T, &T)>) -> Subscription {
		let baseline = self.read().clone();
		let id = self.inner.listeners.insert(Rc::new(DerivedListener {
			callback,
			last_seen: RefCell::new(baseline),
		}));
		debug!(cell = %self.inner.node, listener = ?id, "subscribed");
		let target: Weak<dyn Detach> = Rc::downgrade(&self.inner) as Weak<dyn Detach>;
		Subscription::new(target, id)
	}

	/// Recomputes now and notifies each subscription whose last seen value differs.
	///
	/// Writes to source cells do this automatically. Calling it directly is useful when the
	/// derivation reads something outside of any cell.
	pub fn refresh(&self) {
		let inner = &self.inner;
		if inner.recompute() {
			inner.node.invalidate_dependents();
		}
		// Notified while settling, so that writes from listeners queue behind this round.
		let this: Weak<dyn Dependent> = Weak::clone(&inner.this) as Weak<dyn Dependent>;
		inner.node.store().schedule(inner.node.id(), this);
		inner.node.store().flush();
	}

	/// A [`Stream`](`futures_lite::Stream`) of each following change.
	pub fn changes(&self) -> Changes<T> {
		Changes::new(|callback| self.subscribe_boxed(callback))
	}

	/// Number of currently registered listeners.
	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.inner.listeners.len()
	}
}

impl<T: 'static + Clone + PartialEq> RawDerivedCell<T> {
	/// Returns whether the value changed.
	fn recompute(&self) -> bool {
		let getter = Getter::new();
		let next = (self.derive)(&getter);
		self.stale.set(false);
		self.rewire(getter.into_dependencies());

		let changed = *self.value.borrow() != next;
		if changed {
			*self.value.borrow_mut() = next;
		}
		trace!(cell = %self.node, changed, "recomputed");
		changed
	}

	fn refresh_if_stale(&self) {
		if self.stale.get() && self.recompute() {
			self.node.invalidate_dependents();
		}
	}

	fn rewire(&self, next: BTreeMap<CellId, Weak<Node>>) {
		let this: Weak<dyn Dependent> = Weak::clone(&self.this) as Weak<dyn Dependent>;
		let previous = mem::replace(&mut *self.dependencies.borrow_mut(), next);

		for (id, dependency) in &previous {
			if !self.dependencies.borrow().contains_key(id) {
				if let Some(dependency) = dependency.upgrade() {
					dependency.remove_dependent(self.node.id());
				}
			}
		}
		for dependency in self.dependencies.borrow().values() {
			if let Some(dependency) = dependency.upgrade() {
				dependency.add_dependent(self.node.id(), Weak::clone(&this));
			}
		}
	}

	fn notify(&self) {
		let listeners = self.listeners.snapshot();
		if listeners.is_empty() {
			return;
		}

		// Cloned so that listeners may write to sources (and so recompute this cell).
		// Such writes queue this cell again, so the later value is delivered after this one.
		let current = self.value.borrow().clone();
		for listener in listeners {
			if *listener.last_seen.borrow() == current {
				continue;
			}
			let last_seen = listener.last_seen.replace(current.clone());
			(listener.callback)(&current, &last_seen);
		}
	}
}

impl<T: 'static + Clone + PartialEq> Dependent for RawDerivedCell<T> {
	fn mark_stale(&self) {
		self.stale.set(true);
	}

	fn settle(&self) {
		if self.listeners.is_empty() {
			// Recomputed lazily on read, but dependents may have listeners of their own.
			if self.stale.get() {
				self.node.invalidate_dependents();
			}
			return;
		}

		self.refresh_if_stale();
		self.notify();
	}
}

impl<T> Detach for RawDerivedCell<T> {
	fn detach(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	fn is_attached(&self, id: ListenerId) -> bool {
		self.listeners.contains(id)
	}
}

impl<T> Drop for RawDerivedCell<T> {
	fn drop(&mut self) {
		for dependency in self.dependencies.get_mut().values() {
			if let Some(dependency) = dependency.upgrade() {
				dependency.remove_dependent(self.node.id());
			}
		}
	}
}

impl<T> Sealed for DerivedCell<T> {
	fn node(&self) -> &Rc<Node> {
		&self.inner.node
	}
}

impl<T: 'static + Clone + PartialEq> Source for DerivedCell<T> {
	type Output = T;

	fn read(&self) -> Ref<'_, T> {
		self.inner.refresh_if_stale();
		self.inner.value.borrow()
	}
}
