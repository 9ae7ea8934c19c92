//! Read-only access to the memory image of the inspected process.
//!
//! Every backend either fills the whole buffer or fails with
//! [`InspectError::OutOfBoundsRead`]; there are no partial reads.

use crate::prelude::*;

mod core_file;
#[cfg(target_os = "linux")]
mod process;
mod snapshot;

pub use core_file::CoreFile;
#[cfg(target_os = "linux")]
pub use process::ProcessMemory;
pub use snapshot::{Region, SnapshotMemory};

pub trait Memory {
    fn read(&self, address: u64, buf: &mut [u8]) -> InspectResult<()>;

    /// Describe the backend for log messages.
    fn describe(&self) -> String;
}

impl<M: Memory + ?Sized> Memory for Box<M> {
    fn read(&self, address: u64, buf: &mut [u8]) -> InspectResult<()> {
        (**self).read(address, buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Find `[address, address + len)` inside one of the `(start, bytes)` ranges.
pub(crate) fn read_from_ranges<'a, I>(ranges: I, address: u64, buf: &mut [u8]) -> InspectResult<()>
where
    I: IntoIterator<Item = (u64, &'a [u8])>,
{
    let len = buf.len() as u64;
    let end = address
        .checked_add(len)
        .ok_or_else(|| InspectError::out_of_bounds(address, len))?;

    for (start, bytes) in ranges {
        let range_end = start + bytes.len() as u64;
        if start <= address && end <= range_end {
            let offset = (address - start) as usize;
            buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
            return Ok(());
        }
    }

    Err(InspectError::out_of_bounds(address, len))
}
