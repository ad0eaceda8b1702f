//! POSIX shared memory segments
//!
//! The benchmark processes are forked from the leader after the segments are
//! mapped, so every process sees the same memory at the same virtual address.
//! A named segment is created with `O_EXCL` first; if it is left over from an
//! earlier run it is attached instead.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

use anyhow::{Context, Result};
use log::debug;

use crate::Fatal;

/// A `MAP_SHARED` mapping, unmapped on drop
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    name: Option<CString>,
}

// The region is only ever accessed through atomics placed in it by the owners
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create the named segment, or attach to it if it already exists
    pub fn create_or_attach(name: &str, len: usize) -> Result<Self> {
        let c_name = CString::new(name)
            .with_context(|| format!("Invalid segment name {:?}", name))
            .context(Fatal::SharedMemory)?;
        let mode: libc::mode_t = libc::S_IRWXU | libc::S_IRWXG;

        unsafe {
            let mut fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                mode,
            );
            let created = fd >= 0;

            if !created {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EEXIST) {
                    return Err(err)
                        .with_context(|| format!("In shm_open {}", name))
                        .context(Fatal::SharedMemory);
                }

                fd = libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, mode);
                if fd < 0 {
                    return Err(io::Error::last_os_error())
                        .with_context(|| format!("In shm_open {}", name))
                        .context(Fatal::SharedMemory);
                }
                debug!("attached to existing segment {}", name);
            } else {
                debug!("created segment {}", name);
            }

            let mapped = Self::size_and_map(fd, len, created, name);
            libc::close(fd);

            let ptr = mapped?;
            Ok(Self {
                ptr,
                len,
                name: Some(c_name),
            })
        }
    }

    /// An unnamed shared mapping. Threads of this process and children forked
    /// after the call all see it
    pub fn anonymous(len: usize) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error())
                .context("Anonymous shared mapping")
                .context(Fatal::Mapping);
        }

        let ptr = NonNull::new(ptr as *mut u8)
            .context("mmap returned a null pointer")
            .context(Fatal::Mapping)?;

        Ok(Self {
            ptr,
            len,
            name: None,
        })
    }

    unsafe fn size_and_map(fd: libc::c_int, len: usize, created: bool, name: &str) -> Result<NonNull<u8>> {
        // A segment left by a run with a smaller buffer has to grow first
        let needs_resize = if created {
            true
        } else {
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 {
                return Err(io::Error::last_os_error())
                    .with_context(|| format!("fstat on {}", name))
                    .context(Fatal::SharedMemory);
            }
            (stat.st_size as usize) < len
        };

        if needs_resize && libc::ftruncate(fd, len as libc::off_t) < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("ftruncate of {} to {} bytes failed", name, len))
                .context(Fatal::SharedMemory);
        }

        let ptr = libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("mmap of {}", name))
                .context(Fatal::Mapping);
        }

        NonNull::new(ptr as *mut u8)
            .with_context(|| format!("mmap of {} returned a null pointer", name))
            .context(Fatal::Mapping)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Remove the name from the system. Mappings stay valid until dropped
    pub fn unlink(&self) {
        if let Some(name) = &self.name {
            unsafe {
                libc::shm_unlink(name.as_ptr());
            }
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
