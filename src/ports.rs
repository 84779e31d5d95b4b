//! Process-wide port issuance for engine instances.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic port issuer: a fixed base plus the count of prior calls.
///
/// Ports are never reissued within one process lifetime. The sequence is not
/// persisted; [`PortAllocator::reserve`] reseeds it past ports already bound
/// to registry entries that survived a restart.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    next_offset: AtomicU32,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self { base, next_offset: AtomicU32::new(0) }
    }

    /// Issue the next port, strictly greater than every port issued before.
    pub fn next(&self) -> u16 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.base + offset as u16
    }

    /// Advance the sequence so `port` is never issued by [`next`].
    ///
    /// Ports below the base are outside the managed range and ignored.
    ///
    /// [`next`]: PortAllocator::next
    pub fn reserve(&self, port: u16) {
        if port < self.base {
            return;
        }
        let min_offset = (port - self.base) as u32 + 1;
        self.next_offset.fetch_max(min_offset, Ordering::SeqCst);
    }
}
