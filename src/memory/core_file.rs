use super::Memory;
use crate::prelude::*;
use memmap2::Mmap;
use object::{Object, ObjectSegment};
use std::path::{Path, PathBuf};

/// A loadable segment of the core: `file_size` bytes at `file_offset` are the
/// contents of the target memory starting at `vaddr`. The rest of the
/// `mem_size` bytes of the segment read as zeros.
#[derive(Debug, Clone, Copy)]
struct LoadSegment {
    vaddr: u64,
    file_offset: u64,
    file_size: u64,
    mem_size: u64,
}

impl LoadSegment {
    fn contains(&self, address: u64, end: u64) -> bool {
        self.vaddr <= address && end <= self.vaddr.saturating_add(self.mem_size)
    }
}

/// Memory image of a crashed process, read from an ELF core dump.
pub struct CoreFile {
    path: PathBuf,
    mmap: Mmap,
    segments: Vec<LoadSegment>,
}

impl CoreFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open core file {}", path.display()))?;
        // SAFETY: the core file is not expected to be modified while it is inspected
        let mmap = unsafe { Mmap::map(&file)? };

        let segments = {
            let object = object::File::parse(&*mmap)
                .with_context(|| format!("Failed to parse core file {}", path.display()))?;
            if object.kind() != object::ObjectKind::Core {
                warn!("{} is not a core dump, reading its segments anyway", path.display());
            }
            object
                .segments()
                .filter_map(|segment| {
                    let (file_offset, file_size) = segment.file_range();
                    let mem_size = segment.size().max(file_size);
                    (mem_size > 0).then_some(LoadSegment {
                        vaddr: segment.address(),
                        file_offset,
                        file_size,
                        mem_size,
                    })
                })
                .collect::<Vec<_>>()
        };

        if segments.is_empty() {
            bail!("Core file {} has no loadable segments", path.display());
        }
        debug!(
            "Loaded core file {} with {} segment(s)",
            path.display(),
            segments.len()
        );
        for segment in &segments {
            trace!(
                "  {:016x}-{:016x} @ {:08x} ({} bytes in file)",
                segment.vaddr,
                segment.vaddr.saturating_add(segment.mem_size),
                segment.file_offset,
                segment.file_size
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            segments,
        })
    }
}

impl Memory for CoreFile {
    fn read(&self, address: u64, buf: &mut [u8]) -> InspectResult<()> {
        let len = buf.len() as u64;
        let out_of_bounds = || InspectError::out_of_bounds(address, len);
        let end = address.checked_add(len).ok_or_else(out_of_bounds)?;
        let segment = self
            .segments
            .iter()
            .find(|segment| segment.contains(address, end))
            .ok_or_else(out_of_bounds)?;

        let offset = address - segment.vaddr;
        let in_file = segment.file_size.saturating_sub(offset).min(len) as usize;
        if in_file > 0 {
            let start = (segment.file_offset + offset) as usize;
            let bytes = self
                .mmap
                .get(start..start + in_file)
                .ok_or_else(out_of_bounds)?;
            buf[..in_file].copy_from_slice(bytes);
        }
        buf[in_file..].fill(0);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("core file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SEGMENT_VADDR: u64 = 0x7f00_0000_0000;
    const SEGMENT_DATA: &[u8; 16] = b"selva core dump!";
    const DATA_OFFSET: u64 = 128;

    /// An x86_64 ELF core with a single `PT_LOAD` segment holding
    /// `SEGMENT_DATA`, followed by `memsz - filesz` zero bytes.
    fn write_core(mem_size: u64) -> tempfile::NamedTempFile {
        let mut elf = Vec::new();
        // e_ident: ELFCLASS64, ELFDATA2LSB, EV_CURRENT
        elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        elf.extend_from_slice(&[0; 8]);
        elf.extend_from_slice(&4u16.to_le_bytes()); // ET_CORE
        elf.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        elf.extend_from_slice(&1u32.to_le_bytes());
        elf.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        elf.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
        elf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        elf.extend_from_slice(&0u32.to_le_bytes());
        elf.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        elf.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        elf.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        elf.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(elf.len(), 64);

        elf.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        elf.extend_from_slice(&6u32.to_le_bytes()); // PF_R | PF_W
        elf.extend_from_slice(&DATA_OFFSET.to_le_bytes());
        elf.extend_from_slice(&SEGMENT_VADDR.to_le_bytes());
        elf.extend_from_slice(&0u64.to_le_bytes()); // p_paddr
        elf.extend_from_slice(&(SEGMENT_DATA.len() as u64).to_le_bytes());
        elf.extend_from_slice(&mem_size.to_le_bytes());
        elf.extend_from_slice(&0x1000u64.to_le_bytes());
        assert_eq!(elf.len(), 120);

        elf.resize(DATA_OFFSET as usize, 0);
        elf.extend_from_slice(SEGMENT_DATA);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&elf).unwrap();
        file
    }

    fn read(core: &CoreFile, address: u64, len: usize) -> InspectResult<Vec<u8>> {
        let mut buf = vec![0xaa; len];
        core.read(address, &mut buf)?;
        Ok(buf)
    }

    #[test]
    fn test_read_inside_load_segment() {
        let file = write_core(SEGMENT_DATA.len() as u64);
        let core = CoreFile::open(file.path()).unwrap();

        assert_eq!(read(&core, SEGMENT_VADDR, 5).unwrap(), b"selva");
        assert_eq!(read(&core, SEGMENT_VADDR + 11, 5).unwrap(), b"dump!");
        assert_eq!(
            read(&core, SEGMENT_VADDR + 12, 8),
            Err(InspectError::OutOfBoundsRead {
                address: SEGMENT_VADDR + 12,
                len: 8
            })
        );
        assert_eq!(
            read(&core, SEGMENT_VADDR - 1, 2),
            Err(InspectError::OutOfBoundsRead {
                address: SEGMENT_VADDR - 1,
                len: 2
            })
        );
        assert!(core.describe().starts_with("core file "));
    }

    #[test]
    fn test_segment_tail_reads_as_zeros() {
        let file = write_core(32);
        let core = CoreFile::open(file.path()).unwrap();

        assert_eq!(read(&core, SEGMENT_VADDR + 12, 8).unwrap(), b"ump!\0\0\0\0");
        assert_eq!(read(&core, SEGMENT_VADDR + 24, 8).unwrap(), vec![0; 8]);
        assert_eq!(
            read(&core, SEGMENT_VADDR + 32, 1),
            Err(InspectError::OutOfBoundsRead {
                address: SEGMENT_VADDR + 32,
                len: 1
            })
        );
    }

    #[test]
    fn test_open_rejects_non_elf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an ELF file").unwrap();

        let error = CoreFile::open(file.path()).err().unwrap();
        assert!(error.to_string().starts_with("Failed to parse core file"));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(CoreFile::open("/nonexistent/core.1234").is_err());
    }
}
