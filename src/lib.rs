//! Cairn is a general-purpose dynamic memory allocator: it obtains
//! raw address space from the operating system in page-aligned
//! chunks and subdivides each chunk into variably-sized blocks
//! delimited by boundary tags, a header and footer word bracketing
//! every block.
//!
//! The free functions at the crate root (`allocate`, `release`,
//! `resize`, `teardown`, `dump`) operate on a process-wide default
//! [`Arena`]; embedders that want an isolated, independently-torn-down
//! instance should construct their own `Arena` directly.
mod arena;
mod block;
mod chunk;
mod error;
mod file_backed_mapper;
mod mapper;
mod mill;
mod tag;
mod word;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_arena_map;

pub use arena::{allocate, dump, release, resize, teardown, Arena};
pub use error::MapError;
pub use file_backed_mapper::set_file_backed_slab_directory;
pub use mapper::{register_mapper, Mapper};

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crate_root_roundtrip() {
        let p = allocate(128).expect("should allocate");
        let p = resize(Some(p), 512).expect("should resize");
        release(Some(p));
        teardown();
    }

    #[test]
    fn crate_root_allocate_zero_is_none() {
        assert_eq!(allocate(0), None);
    }
}
