use crate::sync::{Arc, AtomicBool, Mutex, Ordering, lock};
use core::fmt;
use crossbeam_channel::Sender;

/// Global stop signal for a run.
///
/// Cancelling stops every branch: nothing new is admitted and every job that
/// has not started is skipped. Jobs already running see
/// [`StepContext::is_cancelled`](crate::job::StepContext::is_cancelled) flip
/// and are expected to wind down; their results are still recorded.
///
/// Clones share the same flag, so one can be moved into a signal handler.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Sender<()>>>,
    /// Cancelling the parent cancels this token too, never the reverse.
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn new(parent: Option<Arc<Inner>>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            wakers: Mutex::new(Vec::new()),
            parent,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }

    fn register(&self, waker: &Sender<()>) {
        let mut wakers = lock(&self.wakers);
        if self.cancelled.load(Ordering::Acquire) {
            let _ = waker.try_send(());
        } else {
            wakers.push(waker.clone());
        }
    }
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(None)),
        }
    }

    /// A token cancelled together with `self`, that can also be cancelled
    /// on its own without touching `self`.
    pub(crate) fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner::new(Some(self.inner.clone()))),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        for waker in lock(&self.inner.wakers).drain(..) {
            // The coordinator may already be gone.
            let _ = waker.try_send(());
        }
    }

    /// Whether cancellation was requested, here or on a parent token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Register a channel that receives a message on cancellation of this
    /// token or any parent. If one is already cancelled the message is sent
    /// immediately. The registration lasts until the returned guard drops.
    pub(crate) fn subscribe(&self, waker: Sender<()>) -> Subscription {
        let mut registered = Vec::new();
        let mut current = Some(&self.inner);
        while let Some(inner) = current {
            inner.register(&waker);
            registered.push(inner.clone());
            current = inner.parent.as_ref();
        }
        Subscription { registered, waker }
    }
}

/// Keeps a waker registered with a token and its parents.
#[must_use = "the waker is unregistered when this is dropped"]
pub(crate) struct Subscription {
    registered: Vec<Arc<Inner>>,
    waker: Sender<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for inner in &self.registered {
            lock(&inner.wakers).retain(|waker| !waker.same_channel(&self.waker));
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::CancellationToken;

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = CancellationToken::new();
        let first = parent.child();
        first.cancel();
        assert!(first.is_cancelled());
        assert!(!parent.is_cancelled());

        let second = parent.child();
        assert!(!second.is_cancelled());
        parent.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn parent_cancel_wakes_child_subscriber() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let _subscription = child.subscribe(tx);
        parent.cancel();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn dropped_subscription_is_unregistered() {
        let parent = CancellationToken::new();
        for _ in 0..3 {
            let (tx, _rx) = crossbeam_channel::bounded::<()>(1);
            let _subscription = parent.child().subscribe(tx);
        }
        assert!(super::lock(&parent.inner.wakers).is_empty());
    }
}
