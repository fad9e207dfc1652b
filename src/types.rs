use core::num::NonZeroU32;
use derive_more::Display;
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;

/// Unique identifier of a job inside one [`Graph`](crate::graph::Graph).
///
/// Ids are handed out in insertion order, starting from 1, so they double as
/// the FIFO tie-break the scheduler uses between concurrently ready jobs.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{_0}")]
#[repr(transparent)]
pub struct JobId(NonZeroU32);

impl JobId {
    pub(crate) fn from_index(index: usize) -> Self {
        let raw = u32::try_from(index)
            .ok()
            .and_then(|idx| idx.checked_add(1))
            .and_then(NonZeroU32::new)
            .expect("JobId::from_index: job count overflow");
        Self(raw)
    }

    /// Zero-based position of the job in insertion order.
    #[must_use]
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// The raw, one-based id.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

pub(crate) type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;

/// Values that flow between jobs.
///
/// Blanket-implemented for every type that can be cloned into several
/// consumers and moved onto a worker thread.
pub trait Value: Clone + core::fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + core::fmt::Debug + Send + Sync + 'static> Value for T {}
