use std::{
	cell::{Ref, RefCell},
	collections::BTreeMap,
	fmt::{self, Debug, Formatter},
	rc::{Rc, Weak},
};

use crate::store::{CellId, Node};

pub(crate) mod private {
	use std::rc::Rc;

	use crate::store::Node;

	pub trait Sealed {
		fn node(&self) -> &Rc<Node>;
	}
}

/// Readable state. Implemented by every cell in this crate.
pub trait Source: private::Sealed {
	/// The value type.
	type Output;

	/// Borrows the current value.
	///
	/// Derived cells are brought up to date first.
	fn read(&self) -> Ref<'_, Self::Output>;

	/// Copies the current value out.
	fn get(&self) -> Self::Output
	where
		Self::Output: Copy,
	{
		*self.read()
	}

	/// Clones the current value out.
	fn get_clone(&self) -> Self::Output
	where
		Self::Output: Clone,
	{
		self.read().clone()
	}

	/// The label given when the cell was created, if any.
	fn debug_label(&self) -> Option<&str> {
		self.node().label()
	}
}

/// Read access handed to derivation closures.
///
/// Every cell read through a [`Getter`] becomes a dependency of the derived cell
/// that's being computed, until its next recomputation.
pub struct Getter {
	dependencies: RefCell<BTreeMap<CellId, Weak<Node>>>,
}

impl Debug for Getter {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Getter")
			.field("dependencies", &self.dependencies.borrow().keys())
			.finish()
	}
}

impl Getter {
	pub(crate) fn new() -> Self {
		Self {
			dependencies: RefCell::new(BTreeMap::new()),
		}
	}

	pub(crate) fn into_dependencies(self) -> BTreeMap<CellId, Weak<Node>> {
		self.dependencies.into_inner()
	}

	fn track<S: ?Sized + Source>(&self, source: &S) {
		let node = source.node();
		self.dependencies
			.borrow_mut()
			.entry(node.id())
			.or_insert_with(|| Rc::downgrade(node));
	}

	/// Borrows the value of `source` and records it as dependency.
	pub fn read<'r, S: ?Sized + Source>(&self, source: &'r S) -> Ref<'r, S::Output> {
		self.track(source);
		source.read()
	}

	/// Copies the value of `source` out and records it as dependency.
	pub fn get<S: ?Sized + Source>(&self, source: &S) -> S::Output
	where
		S::Output: Copy,
	{
		*self.read(source)
	}

	/// Clones the value of `source` out and records it as dependency.
	pub fn get_clone<S: ?Sized + Source>(&self, source: &S) -> S::Output
	where
		S::Output: Clone,
	{
		self.read(source).clone()
	}
}
