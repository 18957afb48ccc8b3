//! In-memory handle that records how it was closed.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::handle::CacheableHandle;

/// A [`CacheableHandle`] with no OS resource behind it.
///
/// Every `close` call is counted, including repeated ones, so tests can
/// assert exactly-once release. `failing_close` builds a handle whose close
/// reports `EIO` on its first close after marking itself closed, like
/// `close(2)` does.
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    open: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: bool,
}

impl MockHandle {
    /// Create an open handle tagged with `id`.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
            fail_close: false,
        }
    }

    /// Create an open handle whose close always fails with `EIO`.
    pub fn failing_close(id: u64) -> Self {
        Self {
            fail_close: true,
            ..Self::new(id)
        }
    }

    /// The tag given at construction.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of times `close` has been called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl CacheableHandle for MockHandle {
    fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if self.fail_close && was_open {
            Err(io::Error::from_raw_os_error(libc::EIO))
        } else {
            Ok(())
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
