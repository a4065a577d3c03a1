//! rhino-map - CLI tool for RHINO register maps
//!
//! Commands:
//! - `rhino-map symtab <design.toml>` - Allocate a design and write its symbol table
//! - `rhino-map decode <file>` - Print a symbol table
//! - `rhino-map lookup <file> <name>` - Resolve one symbol
//! - `rhino-map simulate <design.toml>` - Run a host access through the bridge model
//! - `rhino-map info` - Show tool info and layout defaults

mod manifest;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rhino_bridge::{BusBridge, RegisterFile, Simulation};
use rhino_csr::{decode, LayoutConfig, Permission, ResourceTable, SymbolTable, SymbolTableEntry};

use crate::manifest::Design;

#[derive(Parser)]
#[command(name = "rhino-map")]
#[command(author = "RHINO Contributors")]
#[command(version)]
#[command(about = "RHINO register map manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate a design and write its symbol table
    Symtab {
        /// Design manifest
        design: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print a decoded symbol table
    Decode {
        /// Symbol table file
        file: PathBuf,
    },

    /// Resolve one symbol
    Lookup {
        /// Symbol table file
        file: PathBuf,

        /// Symbol name
        name: String,
    },

    /// Run one host access through the bus bridge model
    Simulate {
        /// Design manifest
        design: PathBuf,

        /// Read every word of a symbol
        #[arg(long, value_name = "SYMBOL", conflicts_with = "write", required_unless_present = "write")]
        read: Option<String>,

        /// Write a value across the words of a symbol
        #[arg(long, value_name = "SYMBOL=VALUE")]
        write: Option<String>,

        /// First word of the symbol to access
        #[arg(long, default_value_t = 0)]
        word: u32,
    },

    /// Show tool info
    Info,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Symtab { design, out } => {
            build_symtab(&design, out.as_deref())?;
        }

        Commands::Decode { file } => {
            let table = load_symtab(&file)?;
            print_table(&table);
        }

        Commands::Lookup { file, name } => {
            let table = load_symtab(&file)?;
            let entry = table
                .lookup(&name)
                .with_context(|| format!("No symbol '{}' in {}", name, file.display()))?;
            print_entry(entry);
        }

        Commands::Simulate {
            design,
            read,
            write,
            word,
        } => {
            simulate(&design, read.as_deref(), write.as_deref(), word)?;
        }

        Commands::Info => {
            show_info();
        }
    }

    Ok(())
}

fn parse_hex_or_dec(s: &str) -> Result<u64> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).context("Invalid hex number")
    } else {
        s.parse::<u64>().context("Invalid decimal number")
    }
}

fn build_symtab(path: &Path, out: Option<&Path>) -> Result<()> {
    let design = Design::load(path)?;
    let registry = design.registry()?;
    let table = ResourceTable::build(&registry, &design.layout)
        .with_context(|| format!("Failed to allocate {}", design.display_name()))?;
    let blob = table.symbols().encode();

    match out {
        Some(out) => {
            fs::write(out, &blob).with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "{} {} symbols, {} banks -> {}",
                "✅".green(),
                table.symbols().len(),
                table.address_map().banks().len(),
                out.display().to_string().bold()
            );
        }
        None => {
            std::io::stdout().write_all(&blob)?;
        }
    }

    Ok(())
}

fn load_symtab(path: &Path) -> Result<SymbolTable> {
    let blob = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let entries = decode(&blob).with_context(|| format!("Malformed symbol table {}", path.display()))?;
    Ok(entries.into())
}

fn permission_label(permission: Permission) -> String {
    let r = if permission.contains(Permission::READ) { 'r' } else { '-' };
    let w = if permission.contains(Permission::WRITE) { 'w' } else { '-' };
    format!("{r}{w}")
}

fn print_entry(entry: &SymbolTableEntry) {
    println!(
        "{:<24} {}  {:#010x}  {:#x}",
        entry.name.bold(),
        permission_label(entry.permission),
        entry.base_address,
        entry.length_bytes
    );
}

fn print_table(table: &SymbolTable) {
    println!("{:<24} {}  {:<10}  {}", "NAME", "RW", "BASE", "LENGTH");
    for entry in table {
        print_entry(entry);
    }
    println!("\n{} symbols", table.len());
}

fn simulate(path: &Path, read: Option<&str>, write: Option<&str>, word: u32) -> Result<()> {
    let design = Design::load(path)?;
    let registry = design.registry()?;
    let table = ResourceTable::build(&registry, &design.layout)?;
    let bridge = BusBridge::new(design.bridge.clone(), &table)?;
    let mut sim = Simulation::new(bridge, RegisterFile::new(&table), design.clocks.clone())?;

    let (symbol, value) = match (read, write) {
        (Some(symbol), _) => (symbol, None),
        (None, Some(assignment)) => {
            let (symbol, value) = assignment
                .split_once('=')
                .context("Expected SYMBOL=VALUE")?;
            (symbol, Some(parse_hex_or_dec(value)?))
        }
        (None, None) => anyhow::bail!("Nothing to simulate, pass --read or --write"),
    };

    let entry = table
        .symbols()
        .lookup(symbol)
        .with_context(|| format!("No symbol '{}' in {}", symbol, design.display_name()))?;
    let base = table
        .csr_address_of(symbol)
        .with_context(|| format!("'{}' is not in the register region", symbol))?;
    let words = words_to_access(&table, entry, word)?;
    let data_width = table.layout().csr_data_width;

    println!(
        "{} Simulating {} on {} ({} ps / {} ps)",
        "🔌".green(),
        symbol.bold(),
        design.display_name(),
        design.clocks.external_period_ps,
        design.clocks.internal_period_ps
    );

    match value {
        None => {
            let mut combined = 0u64;
            for i in 0..words {
                let address = csr_word(base, word + i)?;
                let data = sim.read(address)?;
                println!("  RD [{:#06x}] -> {:#06x}", address, data);
                combined = (combined << data_width) | data as u64;
            }
            println!("{} {} = {:#x}", "✅".green(), symbol.bold(), combined);
        }
        Some(value) => {
            for i in 0..words {
                let address = csr_word(base, word + i)?;
                let shift = (words - 1 - i) * data_width;
                let data = ((value >> shift) & table.layout().data_mask()) as u16;
                sim.write(address, data)?;
                println!("  WR [{:#06x}] <- {:#06x}", address, data);
            }
            println!("{} {} <- {:#x}", "✅".green(), symbol.bold(), value);
        }
    }

    let stats = sim.bridge().stats();
    println!("\nBridge:");
    println!("  Transactions:      {}", stats.transactions);
    println!("  Ignored latches:   {}", stats.ignored_latches);
    println!("  Metastable events: {}", stats.metastable_events);
    println!("  Simulated time:    {} ps", sim.now());
    for change in sim.trace() {
        log::debug!("{:>10} ps  {} -> {}", change.time_ps, change.from, change.to);
    }

    Ok(())
}

/// Words to access from `first`, capped so one register fits a u64
fn words_to_access(table: &ResourceTable<'_>, entry: &SymbolTableEntry, first: u32) -> Result<u32> {
    let layout = table.layout();
    let total = entry.length_bytes / layout.host_word_bytes;
    if first >= total {
        anyhow::bail!("'{}' has {} words, word {} is out of range", entry.name, total, first);
    }
    let max = 64 / layout.csr_data_width;
    Ok((total - first).min(max))
}

fn csr_word(base: u32, word: u32) -> Result<u16> {
    u16::try_from(base + word).context("Word address does not fit the 16-bit bus")
}

fn show_info() {
    let layout = LayoutConfig::default();

    println!("{}", "rhino-map - RHINO register map manager".bold().green());
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("\n{}", "Layout defaults".italic());
    println!("  Register region: {:#010x} (+{:#x})", layout.register_base, layout.register_region_size);
    println!("  Bank stride:     {:#x}", layout.bank_stride);
    println!("  CSR data width:  {} bits", layout.csr_data_width);
    println!("  Host word:       {} bytes", layout.host_word_bytes);
    println!("  Stream region:   {:#010x} (+{:#x})", layout.stream_base, layout.stream_region_size);
    println!("  Stream port:     {:#x} bytes", layout.stream_port_range);
    println!("\nCommands:");
    println!("  rhino-map symtab <design.toml>       Write the symbol table");
    println!("  rhino-map decode <file>              Print a symbol table");
    println!("  rhino-map lookup <file> <name>       Resolve one symbol");
    println!("  rhino-map simulate <design.toml>     Run a host access through the bridge");
}
