//! Cancellable push subscriptions.
//!
//! Store watches are long-lived streams. Each one carries a cancel hook that
//! unregisters it from its source. `cancel()` runs the hook at most once and
//! ends the stream; dropping a live subscription cancels it as well.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

type CancelHook = Box<dyn FnOnce() + Send>;

pub struct Subscription<T> {
    stream: BoxStream<'static, T>,
    on_cancel: Option<CancelHook>,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn new<S, F>(stream: S, on_cancel: F) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Subscription fed by an unbounded channel.
    pub fn from_receiver<F>(rx: mpsc::UnboundedReceiver<T>, on_cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Self::new(stream, on_cancel)
    }

    pub fn is_active(&self) -> bool {
        self.on_cancel.is_some()
    }

    /// Unregisters from the source. Returns `false` if already cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.on_cancel.take() {
            Some(hook) => {
                hook();
                self.stream = stream::empty().boxed();
                true
            }
            None => false,
        }
    }

    /// Derived subscription sharing this one's cancel hook.
    pub fn filter_map<U, F>(mut self, mut f: F) -> Subscription<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        let inner = std::mem::replace(&mut self.stream, stream::empty().boxed());
        Subscription {
            stream: inner
                .filter_map(move |item| future::ready(f(item)))
                .boxed(),
            on_cancel: self.on_cancel.take(),
        }
    }

    pub fn map<U, F>(self, mut f: F) -> Subscription<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.filter_map(move |item| Some(f(item)))
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_cancel.is_some())
            .finish()
    }
}
