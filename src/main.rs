//! fakehttp-ipt6 - command-line front end
//!
//! Provisions the IPv6 mangle chains FakeHTTP's inspection process reads
//! from, and removes them again.
//!
//! # Usage
//!
//! ```bash
//! fakehttp-ipt6 setup -i eth0            # Install rules for eth0
//! fakehttp-ipt6 setup -a --queue-num 9876
//! fakehttp-ipt6 run -i eth0              # Install, wait for SIGINT/SIGTERM, remove
//! fakehttp-ipt6 cleanup                  # Remove all FakeHTTP chains
//! fakehttp-ipt6 show -i eth0             # Print the commands without running them
//! fakehttp-ipt6 config --mark 0x4000 --save
//! ```
//!
//! Values come from `config.json` in the XDG config directory, overridden
//! by command-line flags.

use clap::{Args, Parser, Subcommand};
use fakehttp_ipt6::config::{self, AppConfig, ConfigError};
use fakehttp_ipt6::{
    Error, Ip6tablesExecutor, Provisioner, RulePlan, RuntimeParameters, audit, elevation, utils,
    validators,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, info, warn};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "fakehttp-ipt6")]
#[command(
    about = "Provision the ip6tables rules that feed FakeHTTP's inspection queue",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: Overrides,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to fakehttp-ipt6.log in the state directory
    #[arg(long, global = true)]
    log_file: bool,
}

/// Values that take precedence over config.json
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Read configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Firewall mark of already-handled packets (decimal or 0x hex)
    #[arg(long, global = true, value_parser = validators::parse_u32)]
    mark: Option<u32>,

    /// Mask applied to the mark (decimal or 0x hex)
    #[arg(long, global = true, value_parser = validators::parse_u32)]
    mask: Option<u32>,

    /// NFQUEUE number the inspection process listens on
    #[arg(long, global = true)]
    queue_num: Option<u32>,

    /// Ingress interface to divert (repeatable, replaces the configured list)
    #[arg(short = 'i', long = "interface", global = true, value_name = "NAME")]
    interfaces: Vec<String>,

    /// Divert traffic from every interface
    #[arg(short = 'a', long, global = true)]
    all_interfaces: bool,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(mark) = self.mark {
            config.mark = mark;
        }
        if let Some(mask) = self.mask {
            config.mask = mask;
        }
        if let Some(queue_num) = self.queue_num {
            config.queue_num = queue_num;
        }
        if !self.interfaces.is_empty() {
            config.interfaces.clone_from(&self.interfaces);
            config.all_interfaces = false;
        }
        if self.all_interfaces {
            config.all_interfaces = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clear previous state and install the rules
    Setup,
    /// Remove all FakeHTTP chains (safe to run at any time)
    Cleanup,
    /// Print the ip6tables commands setup would run, without running them
    Show,
    /// Install the rules, wait for SIGINT/SIGTERM, then remove them
    Run,
    /// Print the effective configuration
    Config {
        /// Persist the effective configuration to config.json
        #[arg(long)]
        save: bool,
    },
    /// Show version and build information
    Version,
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, log_file: bool) {
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if !log_file {
        builder.with_writer(std::io::stderr).init();
        return;
    }

    // Set up logging to file
    let log_path = utils::get_state_dir().map(|dir| dir.join("fakehttp-ipt6.log"));
    match log_path.as_ref().map(std::fs::File::create) {
        Some(Ok(file)) => builder
            .with_ansi(false)
            .with_writer(std::io::stderr.and(Mutex::new(file)))
            .init(),
        Some(Err(e)) => {
            builder.with_writer(std::io::stderr).init();
            warn!("Cannot open log file: {e}");
        }
        None => {
            builder.with_writer(std::io::stderr).init();
            warn!("Cannot open log file: state directory unknown");
        }
    }
}

async fn effective_config(overrides: &Overrides) -> Result<AppConfig, ConfigError> {
    let mut config = match &overrides.config {
        Some(path) => config::load_config_from(path).await?,
        None => config::load_config().await?,
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn warn_unknown_interfaces(params: &RuntimeParameters) {
    let present = utils::list_interfaces();
    if present.is_empty() {
        return;
    }
    for name in utils::unknown_interfaces(&params.interfaces, &present) {
        warn!("Interface '{name}' does not exist yet; its rule is installed anyway");
    }
}

fn print_error(error: &Error) {
    let translation = error.translate();
    eprintln!("✗ {}", translation.user_message);
    eprintln!("  {error}");
    for suggestion in &translation.suggestions {
        eprintln!("  • {suggestion}");
    }
    if let Some(url) = &translation.help_url {
        eprintln!("  See: {url}");
    }
}

/// Runs setup, cleaning up again if it fails. Returns whether setup succeeded.
async fn provision(
    provisioner: &Provisioner<Ip6tablesExecutor>,
    params: &RuntimeParameters,
) -> bool {
    if !nix::unistd::getuid().is_root() {
        info!("Not running as root. Will use run0/sudo/pkexec for ip6tables.");
    }

    match provisioner.setup(params).await {
        Ok(report) => {
            audit::log_setup(params, report.skipped.len(), None).await;
            println!("✓ {} ip6tables rules installed.", report.applied);
            for step in &report.skipped {
                println!("  skipped (unsupported by this kernel): {}", step.command);
            }
            true
        }
        Err(e) => {
            audit::log_setup(params, 0, Some(e.to_string())).await;
            print_error(&e);

            eprintln!("Removing partially installed rules...");
            provisioner.cleanup().await;
            audit::log_cleanup("setup failed").await;
            false
        }
    }
}

async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

async fn handle_cli(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Setup => {
            let params = effective_config(&cli.overrides).await?.runtime_parameters()?;
            warn_unknown_interfaces(&params);

            let provisioner = Provisioner::new(Ip6tablesExecutor::new());
            if !provision(&provisioner, &params).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Cleanup => {
            let provisioner = Provisioner::new(Ip6tablesExecutor::new());
            provisioner.cleanup().await;
            audit::log_cleanup("requested").await;
            println!("✓ FakeHTTP ip6tables chains removed.");
        }
        Commands::Show => {
            let params = effective_config(&cli.overrides).await?.runtime_parameters()?;
            let plan = RulePlan::build(&params)?;
            let program = elevation::ip6tables_program();
            print!("{}", plan.to_script(&program.display().to_string()));
        }
        Commands::Run => {
            let params = effective_config(&cli.overrides).await?.runtime_parameters()?;
            warn_unknown_interfaces(&params);

            let provisioner = Provisioner::new(Ip6tablesExecutor::new());
            if !provision(&provisioner, &params).await {
                return Ok(ExitCode::FAILURE);
            }

            println!("Rules active. Press Ctrl+C to remove them and exit.");
            let waited = wait_for_shutdown().await;
            match &waited {
                Ok(signal) => info!("Received {signal}, removing rules"),
                Err(e) => warn!("Cannot wait for signals ({e}), removing rules"),
            }

            provisioner.cleanup().await;
            audit::log_cleanup("shutdown").await;
            println!("✓ FakeHTTP ip6tables chains removed.");
            waited?;
        }
        Commands::Config { save } => {
            let config = effective_config(&cli.overrides).await?;
            if let Err(e) = config.runtime_parameters() {
                warn!("Configuration is not usable for setup: {e}");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);

            if save {
                let path = match &cli.overrides.config {
                    Some(path) => {
                        config::save_config_to(&config, path).await?;
                        path.clone()
                    }
                    None => config::save_config(&config).await?,
                };
                println!("✓ Saved to {}", path.display());
            }
        }
        Commands::Version => {
            println!("fakehttp-ipt6 {}", build::PKG_VERSION);
            println!(
                "commit {}{}",
                build::SHORT_COMMIT,
                if build::GIT_CLEAN { "" } else { " (dirty)" }
            );
            println!("built {}", build::BUILD_TIME);
        }
    }
    Ok(ExitCode::SUCCESS)
}
