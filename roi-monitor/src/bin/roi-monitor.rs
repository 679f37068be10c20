use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use register_comms::ModbusTcpClient;
use roi_monitor::{Config, Supervisor, console, logging};

/// Acquire frames, publish RGB statistics over Modbus TCP and rotate the
/// camera region of interest.
#[derive(Debug, Parser)]
#[command(name = "roi-monitor", author, version)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used if not given.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial number of the camera to open
    #[arg(long)]
    camera: Option<String>,

    /// Modbus TCP server host
    #[arg(long)]
    modbus_host: Option<String>,

    /// Modbus TCP server port
    #[arg(long)]
    modbus_port: Option<u16>,

    /// Interval between region changes, in milliseconds
    #[arg(long)]
    rotation_interval_ms: Option<u64>,

    /// Do not rotate the region of interest
    #[arg(long)]
    no_rotation: bool,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Start acquisition without asking
    #[arg(long)]
    no_start_prompt: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => roi_monitor::parse_config_file(path)
                .with_context(|| format!("reading config file {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(serial) = &self.camera {
            cfg.camera_serial = Some(serial.clone());
        }
        if let Some(host) = &self.modbus_host {
            cfg.modbus.host = host.clone();
        }
        if let Some(port) = self.modbus_port {
            cfg.modbus.port = port;
        }
        if let Some(interval) = self.rotation_interval_ms {
            cfg.rotation.interval_msec = interval;
        }
        if self.no_rotation {
            cfg.rotation.enabled = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() {
    let cli = Cli::parse();
    let _guard = match logging::initiate_logging(cli.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot start logging: {e}");
            return;
        }
    };

    // Operators expect a zero exit status also after failures.
    if let Err(e) = run(&cli) {
        error!("{e:#}");
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let cfg = cli.load_config()?;

    let module = ci2_sim::new_module()?;
    let supervisor = match Supervisor::open(module, &cfg) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!(source = "startup", "{e}");
            return Ok(());
        }
    };

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();

    if !cli.no_start_prompt {
        match console::prompt_start(&mut input, &mut out) {
            Ok(true) => {}
            Ok(false) => {
                supervisor.close();
                return Ok(());
            }
            Err(e) => {
                supervisor.close();
                return Err(e.into());
            }
        }
    }

    let modbus = &cfg.modbus;
    let transport = match ModbusTcpClient::connect(
        &modbus.host,
        modbus.port,
        modbus.unit_id,
        modbus.connect_timeout(),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(
                source = "startup",
                "cannot connect to Modbus server {}:{}: {e}", modbus.host, modbus.port
            );
            supervisor.close();
            return Ok(());
        }
    };

    let running = supervisor.start(transport)?;
    let regions = running.registry().configs().to_vec();
    let menu_result = console::run_menu(&mut input, &mut out, &regions, |index| {
        running.select_region(index)
    });

    let report = running.request_shutdown();
    if let Some(summary) = &report.acquisition {
        info!(source = "shutdown", "{summary:?}");
    }
    menu_result?;
    Ok(())
}
