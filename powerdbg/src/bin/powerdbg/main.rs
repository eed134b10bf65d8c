mod cli;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use powerdbg::config::Registry;
use powerdbg::gdb_server::GdbServer;
use powerdbg::target::{MAX_CHIPS, MAX_PROCESSORS, MAX_THREADS};
use powerdbg::{BackendKind, NodeId, SelectionState, System, TargetStatus};

#[derive(clap::Parser)]
#[clap(
    name = "powerdbg",
    about = "Debug bridge for POWER processor subsystems",
    version
)]
struct Cli {
    /// Processors to operate on, e.g. 0-3,5
    #[clap(short = 'p', long = "processor", value_name = "LIST")]
    processor: Option<String>,
    /// Chips (cores/chiplets) to operate on
    #[clap(short = 'c', long = "chip", value_name = "LIST")]
    chip: Option<String>,
    /// Threads to operate on
    #[clap(short = 't', long = "thread", value_name = "LIST")]
    thread: Option<String>,
    /// Run on all possible processors/chips/threads
    #[clap(short = 'a', long = "all")]
    all: bool,
    /// Transport backend: fake, kernel, host, i2c or fsi
    #[clap(short = 'b', long = "backend", default_value = "kernel")]
    backend: BackendKind,
    /// Backend device: a device node path or GPIO directory
    #[clap(short = 'd', long = "device")]
    device: Option<String>,
    /// Backend slave address (I2C only)
    #[clap(short = 's', long = "slave-address", value_parser = cli::parse_u16)]
    slave_address: Option<u16>,
    /// Log level: 0 error (default), 1 warning, 2-3 info, 4 debug
    #[clap(short = 'D', long = "debug", default_value_t = 0)]
    debug: u8,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print the probed target tree
    Probe,
    /// Read a pib register
    Getscom {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
    },
    /// Write a pib register
    Putscom {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
        #[clap(value_parser = cli::parse_u64)]
        value: u64,
    },
    /// Read an fsi register
    Getcfam {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
    },
    /// Write an fsi register
    Putcfam {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
        #[clap(value_parser = cli::parse_u64)]
        value: u64,
    },
    /// Read physical memory through the ADU
    Getmem {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
        #[clap(value_parser = cli::parse_u64)]
        count: u64,
    },
    /// Write physical memory through the ADU
    Putmem {
        #[clap(value_parser = cli::parse_u64)]
        address: u64,
        /// Bytes to write, as a hex string like deadbeef
        data: String,
    },
    /// Start selected threads
    Start,
    /// Stop selected threads
    Stop,
    /// Step selected threads by <count> instructions
    Step {
        #[clap(default_value_t = 1)]
        count: usize,
    },
    /// Print the status of selected threads
    Threadstatus,
    /// Serve the GDB remote protocol over the first selected thread
    Gdbserver { port: u16 },
    /// Release wake-locks and other target resources
    Release,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!(
                "No valid targets found or specified. Try adding -p/-c/-t options to specify a target.\n\
                 Alternatively run 'powerdbg -a probe' to get a list of all valid targets"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("powerdbg: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(level: u8) {
    let default = match level {
        0 => "error",
        1 => "warn",
        2 | 3 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<bool> {
    let processors = parse_level(cli.processor.as_deref(), MAX_PROCESSORS, "-p")?;
    let chips = parse_level(cli.chip.as_deref(), MAX_CHIPS, "-c")?;
    let threads = parse_level(cli.thread.as_deref(), MAX_THREADS, "-t")?;
    let selection = SelectionState::build(
        processors.as_deref(),
        chips.as_deref(),
        threads.as_deref(),
        cli.all,
    )?;

    let registry = Registry::from_builtin_systems()?;
    let desc = registry.for_backend(cli.backend)?;
    let mut system = System::new(desc, cli.device.as_deref(), cli.slave_address)?;
    selection.apply(&mut system);

    // The system releases every probed target when it drops, whichever way
    // the command below ends.
    dispatch(&mut system, cli.command)
}

fn parse_level(arg: Option<&str>, max: usize, flag: &str) -> Result<Option<Vec<usize>>> {
    arg.map(|list| cli::parse_list(list, max).with_context(|| format!("failed to parse '{flag} {list}'")))
        .transpose()
}

fn dispatch(system: &mut System, command: Command) -> Result<bool> {
    match command {
        Command::Probe => {
            for pib in system.by_class("pib").collect::<Vec<_>>() {
                print_target(system, pib, 0);
            }
            println!();
            println!(
                "Note that only selected targets will be shown above. If none are shown\n\
                 try adding '-a' to select all targets"
            );
            Ok(true)
        }
        Command::Getscom { address } => {
            let count = for_each_selected(system, "pib", |system, id, index| {
                match system.read_register(id, address) {
                    Ok(value) => println!("p{index}: {address:#x} = {value:#018x}"),
                    Err(e) => warn!("p{index}: {e}"),
                }
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Putscom { address, value } => {
            let count = for_each_selected(system, "pib", |system, id, index| {
                if let Err(e) = system.write_register(id, address, value) {
                    warn!("p{index}: {e}");
                }
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Getcfam { address } => {
            let count = for_each_selected(system, "fsi", |system, id, index| {
                match system.read_register(id, address) {
                    Ok(value) => println!("p{index}: {address:#x} = {:#010x}", value as u32),
                    Err(e) => warn!("p{index}: {e}"),
                }
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Putcfam { address, value } => {
            let count = for_each_selected(system, "fsi", |system, id, index| {
                if let Err(e) = system.write_register(id, address, value) {
                    warn!("p{index}: {e}");
                }
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Getmem { address, count } => {
            let Some(adu) = powerdbg::chip::Adu::first_enabled(system) else {
                return Err(anyhow!("no enabled ADU target"));
            };
            let mut data = vec![0u8; count as usize];
            system.adu(adu)?.read(address, &mut data)?;
            print_hex_dump(address, &data);
            Ok(true)
        }
        Command::Putmem { address, data } => {
            let data = cli::parse_hex_bytes(&data).map_err(|e| anyhow!(e))?;
            let Some(adu) = powerdbg::chip::Adu::first_enabled(system) else {
                return Err(anyhow!("no enabled ADU target"));
            };
            system.adu(adu)?.write(address, &data)?;
            println!("Wrote {} bytes starting at {address:#018x}", data.len());
            Ok(true)
        }
        Command::Start => {
            let count = for_each_selected(system, "thread", |system, id, _| {
                system.thread(id)?.start()?;
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Stop => {
            let count = for_each_selected(system, "thread", |system, id, _| {
                system.thread(id)?.stop()?;
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Step { count: steps } => {
            let count = for_each_selected(system, "thread", |system, id, _| {
                system.thread(id)?.step(steps)?;
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Threadstatus => {
            let count = for_each_selected(system, "thread", |system, id, index| {
                let pib = target_index_of(system, id, "pib");
                let core = target_index_of(system, id, "core");
                let status = system.thread(id)?.status()?;
                let mut flags = Vec::new();
                if status.active() {
                    flags.push("active");
                }
                if status.quiesced() {
                    flags.push("quiesced");
                }
                println!("p{pib}:c{core}:t{index}: {}", flags.join(" "));
                Ok(())
            })?;
            Ok(count > 0)
        }
        Command::Gdbserver { port } => {
            let threads: Vec<_> = system.by_class("thread").collect();
            let thread = threads
                .into_iter()
                .find(|id| {
                    system.target(*id).selected()
                        && system.probe(*id).ok() == Some(TargetStatus::Enabled)
                })
                .ok_or_else(|| anyhow!("no enabled thread selected, use -p/-c/-t"))?;
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            GdbServer::new(system, thread, addr)?.run()?;
            Ok(true)
        }
        Command::Release => {
            system.release_all();
            Ok(true)
        }
    }
}

/// Run `f` over every selected target of `class` that probes as enabled,
/// and count them.
fn for_each_selected<F>(system: &mut System, class: &str, mut f: F) -> Result<usize>
where
    F: FnMut(&mut System, NodeId, u32) -> Result<()>,
{
    let targets: Vec<_> = system.by_class(class).collect();
    let mut count = 0;
    for id in targets {
        if !system.target(id).selected() {
            continue;
        }
        match system.probe(id) {
            Ok(TargetStatus::Enabled) => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("probe of {} failed: {e}", system.path(id));
                continue;
            }
        }
        let index = system
            .target(id)
            .index()
            .ok_or_else(|| anyhow!("{} has no index", system.path(id)))?;
        f(system, id, index)?;
        count += 1;
    }
    Ok(count)
}

fn target_index_of(system: &System, id: NodeId, class: &str) -> u32 {
    system
        .parent_of_class(id, class)
        .and_then(|p| system.target(p).index())
        .unwrap_or(0)
}

fn print_target(system: &mut System, id: NodeId, level: usize) {
    if !system.target(id).selected() {
        return;
    }
    if system.probe(id).ok() != Some(TargetStatus::Enabled) {
        return;
    }

    let name = system.tree().node(id).name().to_string();
    let index = system.target(id).index().unwrap_or(0);
    let prefix = match system.target(id).class() {
        Some("pib") => Some('p'),
        Some("core") => Some('c'),
        Some("thread") => Some('t'),
        _ => None,
    };
    let indent = "    ".repeat(level);
    match prefix {
        Some(prefix) => println!("{indent}{prefix}{index}: {name}"),
        None => println!("{indent}{name}"),
    }

    for child in system.tree().node(id).children().to_vec() {
        print_target(system, child, level + 1);
    }
}

fn print_hex_dump(address: u64, data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        let offset = address + 16 * i as u64;
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{offset:#018x}: {}", bytes.join(" "));
    }
}
