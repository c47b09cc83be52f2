use std::panic::{catch_unwind, AssertUnwindSafe};

use tendril::{ListenableCell, Source as _, Store};

use _validator::Validator;

#[test]
fn notifies_new_and_previous() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, "a");

	let _sub = cell.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});
	v.expect([]);

	cell.set("b");
	v.expect([("b", "a")]);
	assert_eq!(cell.get(), "b");
}

#[test]
fn counter() {
	let v = Validator::new();
	let store = Store::new();
	let counter = ListenableCell::labeled(&store, 0, "counter");
	assert_eq!(counter.debug_label(), Some("counter"));

	let sub = counter.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});

	counter.set(1);
	v.expect([(1, 0)]);

	counter.update(|previous| previous + 1);
	v.expect([(2, 1)]);

	drop(sub);
	counter.set(10);
	v.expect([]);
	assert_eq!(counter.get(), 10);
}

#[test]
fn listeners_run_in_registration_order() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);

	let subs: Vec<_> = ["first", "second", "third"]
		.into_iter()
		.map(|name| {
			let v = v.clone();
			cell.subscribe(move |new, _| v.push((name, *new)))
		})
		.collect();

	cell.set(1);
	v.expect([("first", 1), ("second", 1), ("third", 1)]);
	drop(subs);
}

#[test]
fn same_callback_twice_is_two_registrations() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);

	let listener = {
		let v = v.clone();
		move |new: &i32, _: &i32| v.push(*new)
	};
	let a = cell.subscribe(listener.clone());
	let b = cell.subscribe(listener);
	assert_ne!(a.id(), b.id());
	assert_eq!(cell.listener_count(), 2);

	cell.set(1);
	v.expect([1, 1]);

	assert!(a.unsubscribe());
	assert_eq!(cell.listener_count(), 1);
	cell.set(2);
	v.expect([2]);

	drop(b);
	cell.set(3);
	v.expect([]);
}

#[test]
fn removing_a_stale_subscription_leaves_others_alone() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);
	let other = ListenableCell::new(&store, 0);

	let _kept = cell.subscribe({
		let v = v.clone();
		move |new, _| v.push(*new)
	});
	let foreign = other.subscribe(|_, _| ());
	drop(other);

	assert!(!foreign.is_attached());
	assert!(!foreign.unsubscribe());
	assert_eq!(cell.listener_count(), 1);

	cell.set(1);
	v.expect([1]);
}

#[test]
fn panicking_listener_aborts_the_rest() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);

	let _first = cell.subscribe({
		let v = v.clone();
		move |new, _| v.push(("first", *new))
	});
	let _panics = cell.subscribe(|new, _| assert_ne!(*new, 1, "listener refused"));
	let _last = cell.subscribe({
		let v = v.clone();
		move |new, _| v.push(("last", *new))
	});

	assert!(catch_unwind(AssertUnwindSafe(|| cell.set(1))).is_err());
	v.expect([("first", 1)]);
	assert_eq!(cell.get(), 1);

	cell.set(2);
	v.expect([("first", 2), ("last", 2)]);
}

#[test]
fn failed_update_changes_nothing() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 5_u8);

	let _sub = cell.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});

	let result = cell.try_update(|value| value.checked_add(255).ok_or("overflow"));
	assert_eq!(result, Err("overflow"));
	assert_eq!(cell.get(), 5);
	v.expect([]);

	cell.try_update(|value| value.checked_sub(1).ok_or("underflow"))
		.unwrap();
	v.expect([(4, 5)]);
}

#[test]
fn registrations_during_dispatch_apply_to_the_next_write() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);
	let late = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

	let _registrar = cell.subscribe({
		let (v, cell, late) = (v.clone(), cell.clone(), late.clone());
		move |new, _| {
			v.push(("registrar", *new));
			let v = v.clone();
			late.borrow_mut()
				.push(cell.subscribe(move |new, _| v.push(("late", *new))));
		}
	});

	cell.set(1);
	v.expect([("registrar", 1)]);

	cell.set(2);
	v.expect([("registrar", 2), ("late", 2)]);
}

#[test]
fn listeners_may_write_other_cells() {
	let v = Validator::new();
	let store = Store::new();
	let source = ListenableCell::new(&store, 0);
	let mirror = ListenableCell::new(&store, 0);

	let _forward = source.subscribe({
		let mirror = mirror.clone();
		move |new, _| mirror.set(*new * 10)
	});
	let _observe = mirror.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});

	source.set(2);
	v.expect([(20, 0)]);
	assert_eq!(mirror.get(), 20);
}

#[test]
fn listeners_may_write_their_own_cell() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 0);

	let _clamp = cell.subscribe({
		let cell = cell.clone();
		move |new, _| {
			if *new > 10 {
				cell.set(10);
			}
		}
	});
	let _observe = cell.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});

	cell.set(50);
	v.expect([(50, 0), (10, 50)]);
	assert_eq!(cell.get(), 10);

	cell.set(3);
	v.expect([(3, 10)]);
}

#[test]
fn panicking_updater_changes_nothing() {
	let v = Validator::new();
	let store = Store::new();
	let cell = ListenableCell::new(&store, 7);

	let _sub = cell.subscribe({
		let v = v.clone();
		move |new, previous| v.push((*new, *previous))
	});

	let result = catch_unwind(AssertUnwindSafe(|| {
		cell.update(|_| panic!("updater failed"));
	}));
	assert!(result.is_err());
	assert_eq!(cell.get(), 7);
	v.expect([]);

	cell.update(|value| value + 1);
	v.expect([(8, 7)]);
}
