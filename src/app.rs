use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};
use log::{debug, warn};
use selva_inspect::commands::{self, Session};
use selva_inspect::config::InspectConfig;
use selva_inspect::logger::init_local_logger;
use selva_inspect::memory::{CoreFile, Memory, SnapshotMemory};
use selva_inspect::printers::Printers;
use selva_inspect::symbols::SymbolTable;
use selva_inspect::target::{Target, TypeRegistry, debug_info};

const ACCENT_COLOR_CODE: u8 = 208;

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::Ansi256Color(ACCENT_COLOR_CODE).on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

fn parse_address(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|error| format!("invalid address '{text}': {error}"))
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Inspect Selva hierarchy nodes and vectors of a halted process or a core dump",
    styles = create_styles()
)]
pub struct Cli {
    /// Read the memory of this live process. It must be stopped while inspected
    #[arg(long, global = true, conflicts_with_all = ["core", "raw"])]
    pub pid: Option<i32>,

    /// Read memory from an ELF core dump
    #[arg(long, global = true, conflicts_with = "raw")]
    pub core: Option<PathBuf>,

    /// Read memory from a raw dump, loaded at --raw-base
    #[arg(long, global = true, requires = "raw_base")]
    pub raw: Option<PathBuf>,

    /// Target address of the first byte of --raw
    #[arg(long, global = true, value_parser = parse_address, requires = "raw")]
    pub raw_base: Option<u64>,

    /// The inspected binary. Its debug info provides the type layouts and its
    /// symbol table the symbols of expressions
    #[arg(long, env = "SELVA_INSPECT_BINARY", global = true)]
    pub binary: Option<PathBuf>,

    /// Offset between the addresses of --binary and where it is loaded.
    /// Computed from /proc/<pid>/maps when inspecting a live process
    #[arg(long, global = true, value_parser = parse_address)]
    pub load_bias: Option<u64>,

    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/selva-inspect/{config-name}.yaml
    /// Otherwise, loads from ~/.config/selva-inspect/config.yaml
    #[arg(long, env = "SELVA_INSPECT_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Display the value of an expression
    Print {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        expression: Vec<String>,
    },
    /// Dump every element of an SVector, reading each as a pointer to ELEMENT_TYPE
    SvectorDump {
        expression: String,
        element_type: String,
    },
    /// Read commands from stdin
    Shell,
}

fn open_memory(cli: &Cli) -> Result<Box<dyn Memory>> {
    if let Some(pid) = cli.pid {
        #[cfg(target_os = "linux")]
        return Ok(Box::new(selva_inspect::memory::ProcessMemory::attach(pid)?));
        #[cfg(not(target_os = "linux"))]
        bail!("Inspecting live process {pid} is only supported on Linux");
    }
    if let Some(core) = &cli.core {
        return Ok(Box::new(CoreFile::open(core)?));
    }
    if let (Some(raw), Some(base)) = (&cli.raw, cli.raw_base) {
        return Ok(Box::new(SnapshotMemory::from_raw_file(raw, base)?));
    }
    bail!("Nothing to inspect: pass one of --pid, --core or --raw");
}

fn load_symbols(cli: &Cli) -> Result<SymbolTable> {
    let Some(binary) = &cli.binary else {
        return Ok(SymbolTable::new());
    };

    let load_bias = match (cli.load_bias, cli.pid) {
        (Some(load_bias), _) => load_bias,
        #[cfg(target_os = "linux")]
        (None, Some(pid)) => selva_inspect::symbols::live_load_bias(pid, binary)?,
        _ => 0,
    };
    SymbolTable::load(binary, load_bias)
}

/// Layouts from the debug info of the binary, or the built-in compact layouts
/// when there is none.
fn base_types(cli: &Cli) -> TypeRegistry {
    let Some(binary) = &cli.binary else {
        warn!("No --binary given, using the built-in layouts");
        return TypeRegistry::selva();
    };
    match debug_info::load_type_registry(binary) {
        Ok(types) => types,
        Err(error) => {
            warn!("{error:#}, using the built-in layouts");
            TypeRegistry::selva()
        }
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let config = InspectConfig::load(cli.config_name.as_deref())?;
    let types = config.type_registry(base_types(cli))?;
    let symbol_types = config.symbol_types(&types)?;
    let memory = open_memory(cli)?;
    debug!("Inspecting {}", memory.describe());

    let target = Target::new(memory, types).with_symbols(load_symbols(cli)?, symbol_types);
    Ok(Session::new(target, Printers::selva()))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;

    let session = open_session(&cli)?;
    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Commands::Print { expression } => {
            let line = format!("{} {}", commands::PRINT, expression.join(" "));
            session.execute(&line, &mut stdout)?;
        }
        Commands::SvectorDump {
            expression,
            element_type,
        } => {
            let line = format!(
                "{} {}",
                commands::SVECTOR_DUMP,
                shell_words::join([expression, element_type])
            );
            session.execute(&line, &mut stdout)?;
        }
        Commands::Shell => {
            let stdin = std::io::stdin();
            let interactive = stdin.is_terminal();
            commands::run_shell(&session, stdin.lock(), &mut stdout, interactive)
                .context("Shell session failed")?;
        }
    }

    stdout.flush()?;
    Ok(())
}
