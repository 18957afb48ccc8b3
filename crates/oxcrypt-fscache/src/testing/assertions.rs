//! Custom assertions for handle cache tests.
//!
//! Reusable checks for I/O results, errno values and file content, with
//! failure messages that name the errno instead of dumping raw numbers.

/// Assert that two byte slices are equal with helpful error messages.
///
/// On failure, shows sizes and first differing position rather than
/// dumping potentially large byte arrays.
pub fn assert_bytes_equal(actual: &[u8], expected: &[u8], context: &str) {
    if actual.len() != expected.len() {
        panic!(
            "{}: size mismatch - expected {} bytes, got {} bytes",
            context,
            expected.len(),
            actual.len()
        );
    }

    if let Some((i, (a, e))) = actual
        .iter()
        .zip(expected.iter())
        .enumerate()
        .find(|(_, (a, e))| a != e)
    {
        panic!("{context}: content mismatch at byte {i} - expected 0x{e:02x}, got 0x{a:02x}");
    }
}

/// Assert that an I/O result is an error with a specific errno.
pub fn assert_errno<T: std::fmt::Debug>(
    result: std::io::Result<T>,
    expected_errno: i32,
    context: &str,
) {
    match result {
        Ok(value) => {
            panic!("{context}: expected errno {expected_errno} but got success with {value:?}");
        }
        Err(err) => {
            let actual_errno = err.raw_os_error().unwrap_or(0);
            if actual_errno != expected_errno {
                panic!(
                    "{}: expected errno {} ({}), got errno {} ({})",
                    context,
                    expected_errno,
                    errno_name(expected_errno),
                    actual_errno,
                    errno_name(actual_errno)
                );
            }
        }
    }
}

/// Get a human-readable name for the errno values handle operations produce.
fn errno_name(errno: i32) -> &'static str {
    match errno {
        libc::ENOENT => "ENOENT",
        libc::EEXIST => "EEXIST",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::ENOTEMPTY => "ENOTEMPTY",
        libc::EACCES => "EACCES",
        libc::EPERM => "EPERM",
        libc::EINVAL => "EINVAL",
        libc::EIO => "EIO",
        libc::EBADF => "EBADF",
        libc::EMFILE => "EMFILE",
        libc::ENFILE => "ENFILE",
        libc::ENOSPC => "ENOSPC",
        libc::ELOOP => "ELOOP",
        libc::EROFS => "EROFS",
        _ => "UNKNOWN",
    }
}

/// Assert that an I/O result is Ok and return the value.
pub fn assert_io_ok<T>(result: std::io::Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            let errno = err.raw_os_error().unwrap_or(0);
            panic!(
                "{}: expected success but got error: {} (errno {} = {})",
                context,
                err,
                errno,
                errno_name(errno)
            );
        }
    }
}

/// Assert that an I/O result is an error (any error).
pub fn assert_io_err<T: std::fmt::Debug>(result: std::io::Result<T>, context: &str) {
    if let Ok(value) = result {
        panic!("{context}: expected error but got success with {value:?}");
    }
}
