use tokio::sync::watch;

/// A minimal stand-in for a Go-style `context.Context`'s cancellation
/// half: every public operation in `SPEC_FULL.md` §5 takes one of these,
/// and observes it going true to mean "ctx done".
///
/// Built on a `tokio::select!`-over-`watch` idiom rather than a dedicated
/// cancellation-token crate, since nothing else in this workspace needs
/// one.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once this token (or an ancestor) is canceled. Safe to
    /// select! against repeatedly.
    pub async fn canceled(&mut self) {
        if self.is_canceled() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Owns the sending half; dropping it or calling [`CancelHandle::cancel`]
/// trips every [`CancelToken`] derived from it.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn child(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// A token that never cancels, for call sites that don't need to bound an
/// operation (e.g. a background task with its own lifecycle).
pub fn never() -> CancelToken {
    let (_tx, rx) = watch::channel(false);
    CancelToken { rx }
}

/// A token that's canceled after `dur`, for call sites that want a
/// deadline rather than an explicit cancellation source.
pub fn with_timeout(dur: std::time::Duration) -> CancelToken {
    let (handle, token) = CancelHandle::new();
    tokio::spawn(async move {
        tokio::time::sleep(dur).await;
        handle.cancel();
    });
    token
}
