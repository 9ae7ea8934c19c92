use crate::prelude::*;
use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};
use std::collections::HashMap;
use std::path::Path;

/// Runtime addresses of the named symbols of the inspected binary.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    addresses: HashMap<String, u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the defined data and text symbols of `binary`, shifted by
    /// `load_bias` to their runtime addresses.
    pub fn load<P: AsRef<Path>>(binary: P, load_bias: u64) -> Result<Self> {
        let binary = binary.as_ref();
        let content = std::fs::read(binary)
            .with_context(|| format!("Failed to read binary {}", binary.display()))?;
        let object = object::File::parse(&*content)
            .with_context(|| format!("Failed to parse binary {}", binary.display()))?;

        let mut table = Self::new();
        for symbol in object.symbols().chain(object.dynamic_symbols()) {
            if symbol.is_undefined() || !matches!(symbol.kind(), SymbolKind::Data | SymbolKind::Text) {
                continue;
            }
            let Ok(name) = symbol.name() else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            table
                .addresses
                .entry(name.to_string())
                .or_insert(symbol.address().wrapping_add(load_bias));
        }

        debug!(
            "Loaded {} symbol(s) from {} (load bias 0x{load_bias:x})",
            table.addresses.len(),
            binary.display()
        );
        Ok(table)
    }

    pub fn insert(&mut self, name: &str, address: u64) {
        self.addresses.insert(name.to_string(), address);
    }

    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.addresses.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Lowest virtual address a `PT_LOAD` segment of `binary` asks for.
fn preferred_base(binary: &Path) -> Result<u64> {
    let content = std::fs::read(binary)
        .with_context(|| format!("Failed to read binary {}", binary.display()))?;
    let object = object::File::parse(&*content)?;
    object
        .segments()
        .map(|segment| segment.address())
        .min()
        .context("Binary has no loadable segments")
}

/// Difference between where the first segment of `binary` is mapped in
/// process `pid` and where the ELF file prefers it to be.
#[cfg(target_os = "linux")]
pub fn live_load_bias(pid: libc::pid_t, binary: &Path) -> Result<u64> {
    let canonical = binary
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", binary.display()))?;
    let process = procfs::process::Process::new(pid)?;
    let maps = process
        .maps()
        .with_context(|| format!("Failed to read /proc/{pid}/maps"))?;

    let mapped_base = maps
        .iter()
        .filter(|map| match &map.pathname {
            procfs::process::MMapPath::Path(path) => path == &canonical,
            _ => false,
        })
        .find(|map| map.offset == 0)
        .map(|map| map.address.0)
        .with_context(|| format!("{} is not mapped in process {pid}", canonical.display()))?;

    // Segment addresses are not page aligned, mappings are
    let preferred = preferred_base(&canonical)? & !0xfff;
    let bias = mapped_base.wrapping_sub(preferred);
    debug!("Load bias of {} in {pid}: 0x{bias:x}", canonical.display());
    Ok(bias)
}
