use std::{
	pin::Pin,
	task::{Context, Poll},
};

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_lite::Stream;
use pin_project::pin_project;

use crate::Subscription;

/// One notification: the value after a change and the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Change<T> {
	/// The committed value.
	pub new: T,
	/// The value observed right before the change.
	pub previous: T,
}

/// [`Stream`] of [`Change`]s to one cell.
///
/// Changes are buffered without bound until polled.
/// The underlying listener is removed when this stream is dropped.
#[pin_project]
#[must_use = "Streams do nothing unless polled. The listener is removed when this is dropped."]
#[derive(Debug)]
pub struct Changes<T> {
	#[pin]
	receiver: UnboundedReceiver<Change<T>>,
	subscription: Subscription,
}

impl<T: 'static + Clone> Changes<T> {
	pub(crate) fn new(subscribe: impl FnOnce(Box<dyn Fn(&T, &T)>) -> Subscription) -> Self {
		let (sender, receiver) = unbounded();
		let subscription = subscribe(Box::new(move |new: &T, previous: &T| {
			// Fails only once the receiver (and with it this listener) is being dropped.
			let _ = sender.unbounded_send(Change {
				new: new.clone(),
				previous: previous.clone(),
			});
		}));
		Self {
			receiver,
			subscription,
		}
	}
}

impl<T> Changes<T> {
	/// The [`Subscription`] feeding this stream.
	pub fn subscription(&self) -> &Subscription {
		&self.subscription
	}
}

impl<T> Stream for Changes<T> {
	type Item = Change<T>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.project().receiver.poll_next(cx)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		self.receiver.size_hint()
	}
}
