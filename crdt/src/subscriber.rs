//! The document's change stream (§4.1 "Change notification").

use crate::record::RecordKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Touched-record notification for a single commit. Subscribers see
/// one event per successful commit, in commit order (§4.1, §5).
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub touched: Vec<RecordKey>,
}

pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) callback: Box<dyn Fn(&ChangeEvent) + Send + Sync>,
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_subscription_id() -> u64 {
    NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A cancellation handle returned by [`crate::doc::Document::subscribe`].
/// Dropping it does not unsubscribe — call [`SubscriptionHandle::cancel`]
/// explicitly, mirroring an owned capability rather than RAII teardown,
/// since a subscriber may want to hand the handle to another task
/// before deciding to cancel.
pub struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) document: Arc<crate::doc::DocumentInner>,
}

impl SubscriptionHandle {
    pub fn cancel(self) {
        self.document.unsubscribe(self.id);
    }
}
