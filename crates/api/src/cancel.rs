use tokio::sync::oneshot;

/// Creates a linked cancellation handle/signal pair.
///
/// The handle stays with whoever owns the request lifecycle; the signal moves
/// into the request future and is raced against the response.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        CancelHandle {
            cancel_tx: Some(cancel_tx),
        },
        CancelSignal {
            cancel_rx: Some(cancel_rx),
            fired: false,
        },
    )
}

/// Owner side of a cooperative cancellation.
///
/// Dropping the handle fires the signal too, so an abandoned request never
/// keeps its connection open.
#[derive(Debug)]
pub struct CancelHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Fires the signal. Returns false if it was already fired or the request
    /// side is gone.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Request side of a cooperative cancellation.
#[derive(Debug)]
pub struct CancelSignal {
    cancel_rx: Option<oneshot::Receiver<()>>,
    fired: bool,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            cancel_rx: None,
            fired: false,
        }
    }

    /// Resolves once the paired handle is cancelled or dropped.
    pub async fn cancelled(&mut self) {
        if self.fired {
            return;
        }
        let Some(cancel_rx) = self.cancel_rx.as_mut() else {
            return std::future::pending::<()>().await;
        };

        // A dropped sender counts as cancellation.
        let _ = cancel_rx.await;
        self.mark_fired();
    }

    /// Non-blocking check, used before starting work that cannot be raced.
    pub fn is_cancelled(&mut self) -> bool {
        if self.fired {
            return true;
        }
        let Some(cancel_rx) = self.cancel_rx.as_mut() else {
            return false;
        };

        match cancel_rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => false,
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                self.mark_fired();
                true
            }
        }
    }

    // A completed receiver must not be polled again.
    fn mark_fired(&mut self) {
        self.fired = true;
        self.cancel_rx = None;
    }
}
