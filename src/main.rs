use anyhow::Result;
use clap::Parser;
use serverkeeper::{Keeper, KeeperConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "serverkeeper")]
#[command(about = "Unattended update, restart and crash-recovery daemon for dedicated game servers")]
#[command(version)]
#[command(long_about = "Keeps a dedicated game server current and alive: polls for new builds, \
announces pending restarts to the configured channels, performs the stop/update/start sequence, \
restarts the process when it dies unexpectedly, and optionally forces a restart on a fixed schedule.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "serverkeeper.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the service")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write daily-rolled log files into this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily-rolled log files")]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Keep the file-log writer alive for the life of the process
    let _log_guard = init_logging(&args)?;

    info!("Starting serverkeeper v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match KeeperConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Validate configuration if requested
    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Assemble the service; every fail-fast check happens here
    let mut keeper = Keeper::new(config).map_err(|e| {
        error!("Failed to assemble the service: {}", e);
        e
    })?;

    // Arm the timers and wait for a shutdown signal
    keeper.run().await.map_err(|e| {
        error!("Service error during execution: {}", e);
        e
    })?;

    info!("serverkeeper exited");
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("serverkeeper={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
        None => fmt::layer().with_target(true).boxed(),
    };

    // Optional daily-rolled log files, matching how the service is usually
    // run unattended
    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "serverkeeper.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# serverkeeper configuration file");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[server]
# Process name to look for in the process table
process_name = "ShooterGameServer"
# Launch scripts executed, in order, to bring the server up
launch_scripts = ["./start_server.sh"]
# Server installation directory (holds the app manifest)
install_dir = "/srv/game"

[update]
# Minutes between update checks
poll_interval_minutes = 5
# Minutes of warning between the pending announcement and the stop
announce_minutes_before = 5
# Directory containing the steamcmd binary
steamcmd_dir = "/opt/steamcmd"
# Steam application id of the dedicated server
app_id = "1006030"
# Last installed build id; 0 means read it from the app manifest
installed_build = 0
# Run an install/update pass at startup before arming the timers
update_on_launch = false

[general]
# Restart the server process when it is found not running
restart_on_crash = true
# Force a restart every N hours; 0 disables the schedule
restart_every_hours = 0
# Seconds between watchdog liveness polls
watchdog_poll_seconds = 30
# Seconds to wait for a clean shutdown before declaring the stop failed
stop_grace_seconds = 30

[discord]
enabled = false
# Webhook URL the announcement is POSTed to
webhook_url = ""

[twitch]
enabled = false
server = "irc.chat.twitch.tv:6667"
# OAuth token ("oauth:...")
oauth = ""
username = ""
# Channel to announce into, without the leading '#'
channel = ""

[rcon]
enabled = false
# Remote-console endpoints, host:port, one per server shard
servers = []
password = ""

[messages]
# @version and @announcebefore are substituted before sending
update_pending = "Server update @version detected. The server will go down for the update in @announcebefore."
# @hours and @announcebefore are substituted before sending
maintenance_pending = "The server has been up for @hours hours and will restart for maintenance in @announcebefore."
restart_complete = "The server has restarted and is back online."
"#;

    println!("{}", default_config);
}
