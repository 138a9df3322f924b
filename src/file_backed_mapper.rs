//! The file-backed mapper backs chunks with a private temporary file
//! instead of anonymous memory. This lets the operating system eagerly
//! swap out cold chunks under memory pressure, at the cost of a little
//! setup work per chunk. Mirrors the teacher's `file_backed_mapper.rs`.
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
use crate::mapper::Mapper;
use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Mutex;

#[derive(Debug)]
pub struct FileBackedMapper {}

lazy_static::lazy_static! {
    static ref FILE_BACKED_PATH: Mutex<Option<PathBuf>> = Default::default();
}

/// Updates the parent directory for the file-backed mapper's temporary
/// files to `path`. `None` reverts to the system default temp
/// directory.
pub fn set_file_backed_slab_directory(path: Option<PathBuf>) {
    let mut global_path = FILE_BACKED_PATH.lock().unwrap();

    *global_path = path;
}

fn get_temp_file(size: usize) -> Result<File, MapError> {
    let path = FILE_BACKED_PATH.lock().unwrap();

    let file = match &*path {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
    .map_err(|e| MapError(e.raw_os_error().unwrap_or(0)))?;

    file.set_len(size as u64)
        .map_err(|e| MapError(e.raw_os_error().unwrap_or(0)))?;
    Ok(file)
}

#[contract_trait]
impl Mapper for FileBackedMapper {
    fn map(&self, size: usize) -> Result<NonNull<c_void>, MapError> {
        let file = get_temp_file(size)?;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };

        // The mapping keeps the file's pages around after `file` is
        // dropped and the descriptor closed; we do not need to keep
        // the `File` alive past this call.
        if ptr == libc::MAP_FAILED {
            log::debug!("file-backed mmap({}) failed: {}", size, io::Error::last_os_error());
            return Err(MapError(io::Error::last_os_error().raw_os_error().unwrap_or(0)));
        }

        log::trace!("file-backed mmap({}) -> {:p}", size, ptr);
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    fn unmap(&self, base: NonNull<c_void>, size: usize) -> Result<(), MapError> {
        let ret = unsafe { libc::munmap(base.as_ptr(), size) };

        if ret == 0 {
            Ok(())
        } else {
            Err(MapError(io::Error::last_os_error().raw_os_error().unwrap_or(0)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapper::page_size;

    #[test]
    fn file_backed_roundtrip() {
        let mapper = FileBackedMapper {};
        let size = page_size();

        let region = mapper.map(size).expect("map should succeed");
        unsafe {
            std::ptr::write_bytes(region.as_ptr() as *mut u8, 0x42, size);
        }
        mapper.unmap(region, size).expect("unmap should succeed");
    }
}
