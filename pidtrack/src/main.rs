use std::{
    env,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use log::{debug, info};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use structopt::{clap::ErrorKind, StructOpt};
use tokio::runtime::Runtime;

use pidtrack::{settings::CONFIG_PATH_DEFAULT, Bpftool, Reconciler, Settings, SsDiscoverer};

/// Adds every process with an open TCP/UDP socket to a pinned BPF traffic
/// map, with zeroed counters.
#[derive(StructOpt)]
#[structopt(name = "pidtrack")]
struct Options {
    /// Settings file [default: /etc/pidtrack/pidtrack.toml]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log the bpftool commands instead of running them
    #[structopt(long)]
    dry_run: bool,

    /// Add only the given PID instead of scanning sockets
    #[structopt(long, allow_hyphen_values = true)]
    pid: Option<i64>,

    /// Path of the pinned map, e.g. /sys/fs/bpf/pid_traffic_map
    #[structopt(parse(from_os_str))]
    map_path: PathBuf,
}

/// Parses the command line. Usage errors exit with 1, help and version
/// output with 0.
fn options() -> Options {
    match Options::from_iter_safe(env::args_os()) {
        Ok(opts) => opts,
        Err(e) => match e.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => e.exit(),
            _ => {
                eprintln!("{}", e.message);
                process::exit(1);
            }
        },
    }
}

fn settings(path: Option<&Path>) -> Result<Settings> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => (Path::new(CONFIG_PATH_DEFAULT), false),
    };
    let settings = Settings::new(path, required)
        .with_context(|| format!("could not load settings from {}", path.display()))?;
    debug!("settings: {:?}", settings);
    Ok(settings)
}

fn main() -> Result<()> {
    let opts = options();

    let log_level = match env::var("PIDTRACK_DEBUG") {
        Ok(_) => LevelFilter::Debug,
        Err(_) => LevelFilter::Info,
    };
    TermLogger::init(
        log_level,
        ConfigBuilder::new()
            .set_target_level(log_level)
            .set_location_level(log_level)
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let settings = settings(opts.config.as_deref())?;
    let timeout = settings.command_timeout();

    let reconciler = Reconciler::new(
        SsDiscoverer::new(settings.ss_path.as_str(), timeout),
        Bpftool::new(settings.bpftool_path.as_str(), timeout).dry_run(opts.dry_run),
    )
    .with_concurrency(settings.write_concurrency);

    let rt = Runtime::new()?;

    match opts.pid {
        Some(pid) => {
            rt.block_on(reconciler.insert_one(&opts.map_path, pid))
                .with_context(|| {
                    format!(
                        "failed to add PID {} to the BPF map at {}",
                        pid,
                        opts.map_path.display()
                    )
                })?;
            println!(
                "Added PID {} to the BPF map at {}.",
                pid,
                opts.map_path.display()
            );
        }
        None => {
            info!("scanning for active network PIDs");
            let summary = rt
                .block_on(reconciler.reconcile_pass(&opts.map_path))
                .context("could not discover active network PIDs")?;
            println!("{}", summary);
        }
    }

    Ok(())
}
