//! Concurrency tests: per-key open exclusivity and exactly-once close.
//!
//! Run: `cargo nextest run -p oxcrypt-fscache --test concurrency_tests`

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use oxcrypt_fscache::testing::{init_tracing, CountingFileSystem, MockHandle};
use oxcrypt_fscache::{
    cache_key, CacheableHandle, CachingFileSystem, FileHandle, FileSystemApi, FileSystemConfig,
    HandleCache, HandleCacheConfig, OpenMode, OsFileSystem, PosixPermissions,
};
use tempfile::TempDir;

const THREADS: usize = 16;

/// Pauses the first open after the OS call returns, so the caller can act
/// while that open is still in flight.
struct GatedFileSystem {
    inner: OsFileSystem,
    armed: AtomicBool,
    opened: Barrier,
    hold: Duration,
}

impl GatedFileSystem {
    fn new(hold: Duration) -> Self {
        Self {
            inner: OsFileSystem,
            armed: AtomicBool::new(true),
            opened: Barrier::new(2),
            hold,
        }
    }

    /// Block until the gated open has its descriptor.
    fn wait_for_open(&self) {
        self.opened.wait();
    }
}

impl FileSystemApi for GatedFileSystem {
    type Handle = FileHandle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<FileHandle> {
        let handle = self.inner.open(path, mode)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.opened.wait();
            thread::sleep(self.hold);
        }
        Ok(handle)
    }

    fn create_file(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        self.inner.create_file(path, permissions)
    }

    fn create_directories(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.create_directories(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.inner.delete(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        self.inner.is_regular_file(path)
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.inner.is_writable(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.file_size(path)
    }

    fn used_space(&self, path: &Path) -> io::Result<u64> {
        self.inner.used_space(path)
    }

    fn set_permissions(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        self.inner.set_permissions(path, permissions)
    }
}

#[test]
fn test_recreate_during_open_leaves_no_stale_handle() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seg");
    std::fs::write(&path, b"old").unwrap();

    let fs = CachingFileSystem::with_api(
        GatedFileSystem::new(Duration::from_millis(300)),
        FileSystemConfig::default(),
    )
    .unwrap();

    let reader = {
        let fs = fs.clone();
        let path = path.clone();
        thread::spawn(move || fs.open_for_read(&path).unwrap())
    };

    // The reader holds a descriptor for the old file but has not cached it yet
    fs.api().wait_for_open();
    fs.delete(&path).unwrap();
    fs.create_file(&path, PosixPermissions::READ_WRITE).unwrap();
    let in_flight = reader.join().unwrap();

    let on_disk = std::fs::metadata(&path).unwrap().len();
    assert_eq!(on_disk, 0);
    assert!(!in_flight.is_open(), "handle to the deleted file was closed");

    let key = cache_key(&path).unwrap();
    if let Some(cached) = fs.read_cache().get(&key) {
        assert_eq!(cached.size().unwrap(), on_disk, "cached handle is for the new file");
    }

    let current = fs.open_for_read(&path).unwrap();
    assert!(!Arc::ptr_eq(&current, &in_flight));
    assert_eq!(current.size().unwrap(), 0);
    let mut buf = [0u8; 3];
    assert_eq!(current.read_at(&mut buf, 0).unwrap(), 0);
}

#[test]
fn test_concurrent_open_for_read_opens_once() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hot");
    std::fs::write(&path, b"hot segment").unwrap();

    let fs = CachingFileSystem::with_api(
        CountingFileSystem::new(OsFileSystem),
        FileSystemConfig::default(),
    )
    .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let fs = fs.clone();
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fs.open_for_read(&path).unwrap()
            })
        })
        .collect();
    let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(fs.api().open_count(&path), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(fs.stats().read.opens, 1);
}

#[test]
fn test_bound_holds_under_concurrent_churn() {
    init_tracing();
    const MAX: u64 = 4;
    let cache: Arc<HandleCache<MockHandle>> = Arc::new(HandleCache::new(
        "read",
        HandleCacheConfig::new(MAX, Duration::from_secs(60)),
    ));
    let opened = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..8u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let opened = Arc::clone(&opened);
            thread::spawn(move || {
                for i in 0..50u64 {
                    let key = format!("/seg/{}", (t * 7 + i) % 12);
                    let handle = cache
                        .get_or_open(&key, || Ok(MockHandle::new(t * 1000 + i)))
                        .unwrap();
                    opened.lock().push(handle);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    cache.run_maintenance();

    assert!(cache.len() <= MAX);

    let opened = opened.lock();
    let mut distinct: Vec<_> = opened.iter().map(Arc::as_ptr).collect();
    distinct.sort_unstable();
    distinct.dedup();

    let stats = cache.stats();
    assert_eq!(distinct.len() as u64, stats.open_count());
    // Every handle no longer resident has been closed exactly once
    let closed = opened
        .iter()
        .filter(|h| !h.is_open())
        .map(|h| Arc::as_ptr(h))
        .collect::<std::collections::HashSet<_>>();
    assert_eq!(closed.len() as u64, stats.close_count());
    assert!(opened.iter().all(|h| h.close_calls() <= 1));
    assert_eq!(stats.open_count() - stats.close_count(), cache.len());
}

#[test]
fn test_invalidate_races_with_open() {
    init_tracing();
    let cache: Arc<HandleCache<MockHandle>> = Arc::new(HandleCache::new(
        "write",
        HandleCacheConfig::new(8, Duration::from_secs(60)),
    ));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let seen = Arc::clone(&seen);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..200u64 {
                    if t % 2 == 0 {
                        let handle = cache
                            .get_or_open("/log", || Ok(MockHandle::new(t * 1000 + i)))
                            .unwrap();
                        seen.lock().push(handle);
                    } else {
                        cache.invalidate("/log");
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    cache.invalidate_all();

    let seen = seen.lock();
    assert!(seen.iter().all(|h| h.close_calls() == 1));
    assert_eq!(cache.stats().close_count(), cache.stats().open_count());
}
