use super::Memory;
use crate::prelude::*;
use libc::pid_t;
use std::fs::File;
use std::os::unix::fs::FileExt;

/// Memory of a live, halted process, read through `/proc/<pid>/mem`.
///
/// The caller must make sure the process is stopped (e.g. under ptrace or
/// SIGSTOP) for the whole inspection; reads are not synchronised with it.
pub struct ProcessMemory {
    pid: pid_t,
    mem: File,
}

impl ProcessMemory {
    pub fn attach(pid: pid_t) -> Result<Self> {
        let process = procfs::process::Process::new(pid)
            .with_context(|| format!("Failed to find process {pid}"))?;
        let mem = process
            .mem()
            .with_context(|| format!("Failed to open /proc/{pid}/mem"))?;

        if let Ok(maps) = process.maps() {
            debug!("Process {pid} has {} memory mapping(s)", maps.iter().count());
        }

        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> pid_t {
        self.pid
    }
}

impl Memory for ProcessMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> InspectResult<()> {
        trace!("pid {} read 0x{address:x} ({} bytes)", self.pid, buf.len());
        self.mem.read_exact_at(buf, address).map_err(|error| {
            trace!("read of 0x{address:x} failed: {error}");
            InspectError::out_of_bounds(address, buf.len() as u64)
        })
    }

    fn describe(&self) -> String {
        format!("process {}", self.pid)
    }
}
