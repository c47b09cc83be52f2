#![warn(clippy::pedantic)]

//! Listenable state cells.
//!
//! Every cell belongs to a [`Store`], which is created once and passed to whatever creates cells.
//!
//! - [`ListenableCell`]: a mutable value. Listeners run synchronously on each write with `(new, previous)`.
//! - [`PersistentCell`]: the same, mirrored into a [`Storage`] backend under a string key.
//! - [`DerivedCell`]: a read-only value computed from other cells. Each subscription is notified
//!   only when the computed value differs from the last one *it* saw.
//!
//! Registering a listener yields a [`Subscription`], which removes exactly that registration
//! when dropped.
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//!
//! use tendril::{DerivedCell, ListenableCell, Source as _, Store};
//!
//! let store = Store::new();
//! let counter = ListenableCell::labeled(&store, 0, "counter");
//! let doubled = DerivedCell::new(&counter, |_, count| count * 2);
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _counter_subscription = counter.subscribe({
//!     let seen = Rc::clone(&seen);
//!     move |new, previous| seen.borrow_mut().push(("counter", *new, *previous))
//! });
//! let doubled_subscription = doubled.subscribe({
//!     let seen = Rc::clone(&seen);
//!     move |new, previous| seen.borrow_mut().push(("doubled", *new, *previous))
//! });
//!
//! counter.set(1);
//! counter.update(|count| count + 1);
//! drop(doubled_subscription);
//! counter.set(10);
//!
//! assert_eq!(doubled.get(), 20);
//! assert_eq!(
//!     *seen.borrow(),
//!     [
//!         ("counter", 1, 0),
//!         ("doubled", 2, 0),
//!         ("counter", 2, 1),
//!         ("doubled", 4, 2),
//!         ("counter", 10, 2),
//!     ]
//! );
//! ```

mod changes;
pub use changes::{Change, Changes};

mod derived_cell;
pub use derived_cell::DerivedCell;

mod listenable_cell;
pub use listenable_cell::ListenableCell;

mod persistent_cell;
pub use persistent_cell::PersistentCell;

pub mod storage;
#[cfg(feature = "file_storage")]
pub use storage::FileStorage;
pub use storage::{MemoryStorage, Storage, StorageError};

mod store;
pub use store::Store;

mod subscription;
pub use subscription::{ListenerId, Subscription};

mod traits;
pub use traits::{Getter, Source};
