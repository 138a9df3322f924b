//! A `Mapper` is responsible for acquiring and releasing raw,
//! page-aligned address space on behalf of the `Mill`. This mirrors
//! the teacher's `mapper.rs`/`file_backed_mapper.rs` split, narrowed
//! to the two operations `spec.md` §6 names: `map` and `unmap`.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::error::MapError;
use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Collaborator the `Mill` asks for raw address-space. Implementations
/// must hand back a writable, readable, private region of exactly the
/// requested size, or fail.
#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Mapper: std::fmt::Debug + Sync {
    /// Obtains a contiguous, writable, zero-filled region of exactly
    /// `size` bytes. `size` is always non-zero and a multiple of the
    /// machine word size, but is not guaranteed to be a multiple of
    /// the page size (`spec.md` §4.4's chunk sizing rounds up to
    /// `BASE_ALLOC_SIZE` or to the request plus overhead, whichever is
    /// larger, not to the next page).
    #[requires(size > 0)]
    #[ensures(ret.is_err() || (ret.unwrap().as_ptr() as usize) % crate::mapper::page_size() == 0,
              "mapped regions are page-aligned")]
    fn map(&self, size: usize) -> Result<NonNull<c_void>, MapError>;

    /// Releases a region previously returned by a single call to
    /// `map` with the same `size`.
    fn unmap(&self, base: NonNull<c_void>, size: usize) -> Result<(), MapError>;
}

/// Returns the platform's page size (assumed stable for the process's
/// lifetime).
pub fn page_size() -> usize {
    lazy_static::lazy_static! {
        static ref PAGE_SIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
    }

    *PAGE_SIZE
}

#[derive(Debug)]
struct DefaultMapper {}

#[contract_trait]
impl Mapper for DefaultMapper {
    fn map(&self, size: usize) -> Result<NonNull<c_void>, MapError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            log::debug!("mmap({}) failed: {}", size, io::Error::last_os_error());
            return Err(MapError(io::Error::last_os_error().raw_os_error().unwrap_or(0)));
        }

        log::trace!("mmap({}) -> {:p}", size, ptr);
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    fn unmap(&self, base: NonNull<c_void>, size: usize) -> Result<(), MapError> {
        log::trace!("munmap({:p}, {})", base.as_ptr(), size);
        let ret = unsafe { libc::munmap(base.as_ptr(), size) };

        if ret == 0 {
            Ok(())
        } else {
            Err(MapError(io::Error::last_os_error().raw_os_error().unwrap_or(0)))
        }
    }
}

lazy_static::lazy_static! {
    static ref NAMED_MAPPERS: Mutex<HashMap<String, &'static dyn Mapper>> = {
        let mut map: HashMap<String, &'static dyn Mapper> = HashMap::new();

        map.insert(
            "file".to_string(),
            Box::leak(Box::new(crate::file_backed_mapper::FileBackedMapper {})),
        );
        Mutex::new(map)
    };
}

/// Upserts the mapper associated with `name`, so it can later be
/// looked up with `get_mapper(Some(name))`.
pub fn register_mapper(name: String, mapper: &'static dyn Mapper) {
    let mut mappers = NAMED_MAPPERS.lock().unwrap();

    mappers.insert(name, mapper);
}

/// Returns the mapper registered under `name`, or the default
/// anonymous-mmap mapper when `name` is `None`.
///
/// # Errors
///
/// Returns `Err` if `name` is `Some` but no such mapper is registered.
pub fn get_mapper(name: Option<&str>) -> Result<&'static dyn Mapper, &'static str> {
    lazy_static::lazy_static! {
        static ref DEFAULT_MAPPER: DefaultMapper = DefaultMapper {};
    }

    match name {
        Some(key) => {
            let mappers = NAMED_MAPPERS.lock().unwrap();

            Ok(*mappers.get(key).ok_or("Mapper not found")?)
        }
        None => Ok(&*DEFAULT_MAPPER),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_mapper_roundtrip() {
        let mapper = get_mapper(None).expect("default mapper always resolves");
        let size = page_size();

        let region = mapper.map(size).expect("map should succeed");
        unsafe {
            std::ptr::write_bytes(region.as_ptr() as *mut u8, 0xAB, size);
        }
        mapper.unmap(region, size).expect("unmap should succeed");
    }

    #[test]
    fn named_mapper_lookup() {
        assert!(get_mapper(Some("file")).is_ok());
        assert!(get_mapper(Some("does-not-exist")).is_err());
    }
}
