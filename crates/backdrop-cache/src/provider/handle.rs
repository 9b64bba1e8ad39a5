use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;

use crate::asset::AssetId;
use crate::caching::{AssetEntry, AssetError};

pub(super) type SharedEntry = Shared<BoxFuture<'static, AssetEntry>>;

/// A pending preparation of one asset, shared by everybody who asked for it.
///
/// Cloning the handle does not start another computation. All clones, and all
/// [`AssetObserver`]s created from them, receive the identical result.
///
/// Dropping every handle does not stop the computation. Its result still ends up in the caches.
#[derive(Clone)]
pub struct InFlightHandle {
    id: AssetId,
    settled: Arc<AtomicBool>,
    result: SharedEntry,
}

impl InFlightHandle {
    pub(super) fn new(id: AssetId, settled: Arc<AtomicBool>, result: SharedEntry) -> Self {
        Self {
            id,
            settled,
            result,
        }
    }

    pub fn id(&self) -> &AssetId {
        &self.id
    }

    /// Whether the computation has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same computation.
    pub fn same_computation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.settled, &other.settled)
    }

    pub(super) fn settled_flag(&self) -> &Arc<AtomicBool> {
        &self.settled
    }

    /// Registers a new observer that can withdraw independently of all others.
    pub fn observe(&self) -> AssetObserver {
        AssetObserver {
            id: self.id.clone(),
            result: self.result.clone(),
            token: CancellationToken::new(),
        }
    }

    /// Waits for the result of the computation.
    pub async fn wait(self) -> AssetEntry {
        self.result.await
    }
}

impl fmt::Debug for InFlightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightHandle")
            .field("id", &self.id)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// One caller waiting for an [`InFlightHandle`].
///
/// Cancelling an observer only stops delivery to that observer, which then resolves to
/// [`AssetError::Cancelled`]. The shared computation and all other observers are unaffected.
pub struct AssetObserver {
    id: AssetId,
    result: SharedEntry,
    token: CancellationToken,
}

impl AssetObserver {
    pub fn id(&self) -> &AssetId {
        &self.id
    }

    /// The token withdrawing this observer, for handing to whoever owns its lifetime.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Withdraws this observer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the shared result, unless this observer is withdrawn first.
    pub async fn wait(self) -> AssetEntry {
        tokio::select! {
            biased;

            _ = self.token.cancelled() => {
                tracing::trace!(id = %self.id, "Observer withdrew");
                Err(AssetError::Cancelled)
            }
            entry = self.result => entry,
        }
    }
}

impl fmt::Debug for AssetObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetObserver")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
