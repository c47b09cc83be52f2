//! A small settings panel, wired up the way an application would do it.

use tendril::{
	DerivedCell, ListenableCell, MemoryStorage, PersistentCell, Source as _, Store, Subscription,
};

use _validator::Validator;

struct Settings {
	font_size: PersistentCell<u32>,
	zoom: ListenableCell<f64>,
	effective_size: DerivedCell<u32>,
}

impl Settings {
	fn new(store: &Store) -> Self {
		let font_size = PersistentCell::labeled(store, "font_size", 12, "font_size").unwrap();
		let zoom = ListenableCell::labeled(store, 1.0, "zoom");
		let effective_size = DerivedCell::labeled(
			&font_size,
			{
				let zoom = zoom.clone();
				move |get, font_size| (f64::from(*font_size) * get.get(&zoom)).round() as u32
			},
			"effective_size",
		);
		Self {
			font_size,
			zoom,
			effective_size,
		}
	}
}

/// Stands in for a mounted UI component: listens while alive.
struct Preview {
	_subscription: Subscription,
}

impl Preview {
	fn mount(settings: &Settings, v: &Validator<(u32, u32)>) -> Self {
		let v = v.clone();
		Self {
			_subscription: settings
				.effective_size
				.subscribe(move |new, previous| v.push((*new, *previous))),
		}
	}
}

#[test]
fn settings_panel() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();

	let v = Validator::new();
	let storage = MemoryStorage::new();
	let store = Store::with_storage(storage.clone());
	let settings = Settings::new(&store);
	assert_eq!(settings.effective_size.get(), 12);

	let preview = Preview::mount(&settings, &v);

	settings.zoom.set(1.5);
	v.expect([(18, 12)]);

	settings.font_size.set(16).unwrap();
	v.expect([(24, 18)]);

	settings.zoom.set(1.6);
	settings.font_size.set(15).unwrap();
	v.expect([(26, 24), (24, 26)]);

	drop(preview);
	settings.zoom.set(2.0);
	v.expect([]);
	assert_eq!(settings.effective_size.get(), 30);

	// The font size survives, zoom doesn't.
	let restarted = Settings::new(&Store::with_storage(storage));
	assert_eq!(restarted.font_size.get(), 15);
	assert_eq!(restarted.effective_size.get(), 15);
}
