use anyhow::Result;
use clap::Parser;
use fotobox::camera::CameraProvider;
use fotobox::{FotoboxApp, FotoboxConfig, FotoboxError};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "fotobox")]
#[command(about = "Photo booth camera control with live view")]
#[command(version)]
#[command(long_about = "Drives the photo booth camera: selects a camera driver, streams its \
live view, takes pictures on request and reports the resulting photos. Supports Sony cameras \
through the Camera Remote API and a demo driver that needs no hardware.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "fotobox.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Override the configured camera driver
    #[arg(long, value_name = "NAME", help = "Camera driver to use (see --list-drivers)")]
    driver: Option<String>,

    /// List the available camera drivers and exit
    #[arg(long, help = "List the available camera drivers and exit")]
    list_drivers: bool,

    /// Take pictures with the keyboard
    #[arg(short, long, help = "Enable the keyboard trigger: SPACE takes a picture, q quits")]
    keyboard: bool,

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
    #[arg(long, help = "Validate configuration file and exit without starting the camera")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    if args.list_drivers {
        for name in CameraProvider::driver_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match FotoboxConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(driver) = &args.driver {
        config.camera.driver = driver.clone();
    }

    // kept alive so buffered file logs are flushed on exit
    let log_guard = init_logging(&args, config.system.log_directory.as_deref())?;

    info!("Starting Fotobox v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

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

    let mut app = FotoboxApp::new(config).map_err(|e| {
        error!("Failed to create application: {}", e);
        e
    })?;
    app.set_keyboard_enabled(args.keyboard);

    app.initialize().await.map_err(|e| {
        error!("Failed to initialize: {}", e);
        e
    })?;

    app.start().await.map_err(|e| {
        error!("Failed to start: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Fotobox exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args, log_directory: Option<&str>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fotobox={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    // plain text copy of the log in a daily rotated file
    let (file_layer, guard) = match log_directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "fotobox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
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
fn print_default_config() -> Result<(), FotoboxError> {
    println!("# Fotobox Configuration File");
    println!("# This is the default configuration with all available options");
    println!("#");
    println!("# camera.driver selects one of: {}", CameraProvider::driver_names().join(", "));
    println!("# system.log_directory enables a daily rotated log file");
    println!();

    let default_config = toml::to_string_pretty(&FotoboxConfig::default())?;
    println!("{}", default_config);
    Ok(())
}
