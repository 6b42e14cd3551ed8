//! cvm - runs and disassembles the bundled Composita programs

use std::process;

use clap::{Parser, Subcommand};
use log::{error, info};

use composita::demos::{self, Demo};
use composita_syscall::{SyscallRegistry, stdlib};
use composita_vm::il_text::program_to_text;
use composita_vm::{Runtime, RuntimeConfig, VmError};

#[derive(Parser)]
#[command(name = "cvm", version, about = "Composita process VM")]
struct Cli {
    /// Log lifecycle events (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the bundled programs
    List,
    /// Execute a bundled program
    Run {
        demo: String,
        /// Abort after this many scheduler turns
        #[arg(long)]
        max_turns: Option<u64>,
        /// Seed of the RANDOM system call
        #[arg(long)]
        seed: Option<u64>,
        /// Only provide system calls from these modules
        #[arg(long = "module", short)]
        modules: Vec<String>,
    },
    /// Print the IL of a bundled program
    Disasm { demo: String },
    /// List the registered system calls
    Syscalls {
        /// Only list system calls from these modules
        #[arg(long = "module", short)]
        modules: Vec<String>,
    },
}

#[derive(Debug)]
enum CliError {
    UnknownDemo(String),
    UnknownModule(String),
    Vm(VmError),
}

impl From<VmError> for CliError {
    fn from(err: VmError) -> Self {
        CliError::Vm(err)
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::UnknownDemo(name) => {
                write!(f, "no program named '{}' (try `cvm list`)", name)
            }
            CliError::UnknownModule(name) => write!(
                f,
                "no system call module named '{}' (available: {})",
                name,
                stdlib::available_modules().join(", ")
            ),
            CliError::Vm(err) => write!(f, "{}", err),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Command::List => {
            cmd_list();
            Ok(())
        }
        Command::Run {
            demo,
            max_turns,
            seed,
            modules,
        } => cmd_run(&demo, max_turns, seed, &modules),
        Command::Disasm { demo } => cmd_disasm(&demo),
        Command::Syscalls { modules } => cmd_syscalls(&modules),
    };

    if let Err(err) = result {
        error!("{}", err);
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn find_demo(name: &str) -> Result<&'static Demo, CliError> {
    demos::find(name).ok_or_else(|| CliError::UnknownDemo(name.to_string()))
}

/// Every built-in when `modules` is empty, otherwise only the named modules.
fn registry_for(modules: &[String]) -> Result<SyscallRegistry, CliError> {
    if modules.is_empty() {
        return Ok(SyscallRegistry::with_builtins());
    }
    let available = stdlib::available_modules();
    if let Some(unknown) = modules
        .iter()
        .find(|m| !available.iter().any(|name| *name == m.as_str()))
    {
        return Err(CliError::UnknownModule(unknown.clone()));
    }
    let names: Vec<&str> = modules.iter().map(String::as_str).collect();
    Ok(SyscallRegistry::with_modules(&names))
}

fn cmd_list() {
    let width = demos::DEMOS
        .iter()
        .map(|demo| demo.name.len())
        .max()
        .unwrap_or(0);
    for demo in demos::DEMOS {
        println!("    {:width$}    {}", demo.name, demo.description, width = width);
    }
}

fn cmd_run(
    name: &str,
    max_turns: Option<u64>,
    seed: Option<u64>,
    modules: &[String],
) -> Result<(), CliError> {
    let program = find_demo(name)?.build()?;
    let syscalls = registry_for(modules)?;

    let mut config = RuntimeConfig::default();
    if let Some(max_turns) = max_turns {
        config = config.with_max_turns(max_turns);
    }
    if let Some(seed) = seed {
        config = config.with_random_seed(seed);
    }

    let mut runtime = Runtime::with_config(config).with_syscalls(syscalls);
    info!("running {}", name);
    runtime.execute(&program)?;
    info!("{} finished after {} turns", name, runtime.turns());
    Ok(())
}

fn cmd_disasm(name: &str) -> Result<(), CliError> {
    let program = find_demo(name)?.build()?;
    print!("{}", program_to_text(&program));
    Ok(())
}

fn cmd_syscalls(modules: &[String]) -> Result<(), CliError> {
    let registry = registry_for(modules)?;
    for (operator, arity) in registry.list_calls() {
        let description = registry
            .get_call_info(operator, arity)
            .and_then(|(_, _, description)| description)
            .unwrap_or("");
        println!("    {:<24} {}    {}", operator.name(), arity, description);
    }
    Ok(())
}
