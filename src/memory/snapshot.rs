use super::{Memory, read_from_ranges};
use crate::prelude::*;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Region {
    pub base: u64,
    pub bytes: Vec<u8>,
}

/// An in-memory image made of disjoint regions.
///
/// Used for raw memory dumps taken at a known base address, and to assemble
/// process images by hand.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    regions: Vec<Region>,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a raw dump whose first byte lives at `base` in the target.
    pub fn from_raw_file<P: AsRef<Path>>(path: P, base: u64) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .with_context(|| format!("Failed to read raw dump {}", path.as_ref().display()))?;
        debug!(
            "Loaded raw dump {} ({} bytes at 0x{base:x})",
            path.as_ref().display(),
            bytes.len()
        );
        let mut snapshot = Self::new();
        snapshot.map(base, bytes.len() as u64);
        snapshot.write(base, &bytes);
        Ok(snapshot)
    }

    /// Map `len` zeroed bytes at `base`, merging with an existing region that
    /// ends exactly at `base`.
    pub fn map(&mut self, base: u64, len: u64) -> &mut Self {
        if let Some(region) = self
            .regions
            .iter_mut()
            .find(|r| r.base + r.bytes.len() as u64 == base)
        {
            region.bytes.resize(region.bytes.len() + len as usize, 0);
        } else {
            self.regions.push(Region {
                base,
                bytes: vec![0; len as usize],
            });
        }
        self
    }

    /// Overwrite mapped bytes. Writing to unmapped memory is a programming
    /// error when building a snapshot.
    pub fn write(&mut self, address: u64, data: &[u8]) -> &mut Self {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.base <= address && address + data.len() as u64 <= r.base + r.bytes.len() as u64)
            .unwrap_or_else(|| panic!("write to unmapped snapshot memory at 0x{address:x}"));
        let offset = (address - region.base) as usize;
        region.bytes[offset..offset + data.len()].copy_from_slice(data);
        self
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> &mut Self {
        self.write(address, &value.to_le_bytes())
    }

    pub fn write_i64(&mut self, address: u64, value: i64) -> &mut Self {
        self.write(address, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, address: u64, value: i32) -> &mut Self {
        self.write(address, &value.to_le_bytes())
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

impl Memory for SnapshotMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> InspectResult<()> {
        trace!("snapshot read 0x{address:x} ({} bytes)", buf.len());
        read_from_ranges(
            self.regions.iter().map(|r| (r.base, r.bytes.as_slice())),
            address,
            buf,
        )
    }

    fn describe(&self) -> String {
        format!("snapshot with {} region(s)", self.regions.len())
    }
}
