//! Error taxonomy (`spec.md` §7). Like the teacher, we do not reach
//! for a dedicated error-handling crate: mapper failures are plain
//! errno-shaped `i32`s (`map.rs`'s `extern "C"` wrappers), and
//! programmer-error conditions are fatal.
use std::fmt;

/// An OS mapping or unmapping call failed. Wraps the raw `errno` the
/// call left behind, or `0` if the caller doesn't know one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MapError(pub i32);

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OS mapping call failed (errno={})", self.0)
    }
}

impl std::error::Error for MapError {}

/// Reports a programming error that leaves the allocator's state
/// unsafe to keep using (double free, resize of a bogus pointer), and
/// aborts the process. `spec.md` §7 calls this `MisuseFatal`: there is
/// no recovery path, mirroring `customAlloc_free`'s `exit(1)` on
/// double free.
#[cold]
#[inline(never)]
pub(crate) fn fatal_misuse(message: &str) -> ! {
    log::error!("fatal allocator misuse: {}", message);
    panic!("fatal allocator misuse: {}", message);
}
