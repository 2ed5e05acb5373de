use anyhow::Context;
use clap::{Parser, Subcommand};
use grblkit::{
    describe_event, init_logging, list_ports, Config, ControllerTrait, EventCategory,
    EventFilter, GrblController, JobPhase, BUILD_DATE, VERSION,
};
use grblkit_communication::firmware::grbl::utils::get_setting_name;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "grblkit", version, about = "Control a GRBL CNC machine over serial")]
struct Cli {
    /// Config file (TOML or JSON); defaults to the platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overriding the config file
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Connect and print one status snapshot
    Status,
    /// Run the homing cycle
    Home,
    /// Print the device's `$` settings
    Settings,
    /// Stream a G-code program
    Run {
        /// Program file
        file: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(port) = &cli.port {
        config.connection.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;
    Ok(config)
}

async fn connect(config: &Config) -> anyhow::Result<GrblController> {
    let controller = GrblController::new(config.to_controller_config());
    controller.subscribe(
        EventFilter::Categories(vec![
            EventCategory::Connection,
            EventCategory::Alarm,
            EventCategory::Job,
            EventCategory::Console,
        ]),
        Box::new(|event| {
            if let Some(line) = describe_event(&event) {
                println!("{}", line);
            }
        }),
    );
    controller
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.connection.port))?;
    Ok(controller)
}

async fn run_program(controller: &GrblController, file: &Path) -> anyhow::Result<bool> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    if !controller.run_gcode_file(lines).await? {
        println!("{} has nothing to send", file.display());
        return Ok(true);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping job");
                controller.stop_job().await?;
                return Ok(false);
            }
        }
        if !controller.is_connected() {
            anyhow::bail!("connection lost while streaming");
        }
        match controller.job_summary() {
            Some(summary) if summary.phase == JobPhase::Complete => {
                return Ok(summary.rejected == 0)
            }
            Some(summary) if summary.phase.is_terminal() => return Ok(false),
            Some(summary) => tracing::debug!(
                "Progress {:.0}% ({}/{})",
                summary.progress() * 100.0,
                summary.resolved,
                summary.sendable_lines
            ),
            None => return Ok(false),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(
        &config.logging.level,
        cli.json_logs || config.logging.json,
    )?;
    tracing::info!("grblkit {} (built {})", VERSION, BUILD_DATE);

    if let Command::Ports = cli.command {
        let ports = list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let controller = connect(&config).await?;
    let outcome = match &cli.command {
        Command::Ports => Ok(true),
        Command::Status => {
            tokio::time::sleep(Duration::from_millis(config.controller.poll_interval_ms * 3))
                .await;
            let status = controller.get_status();
            println!("State:    {}", status.state);
            println!("Work:     {}", status.position.work);
            println!("Machine:  {}", status.position.machine);
            println!(
                "Feed:     {}  Spindle: {}",
                status.feed_rate, status.spindle_speed
            );
            println!(
                "Override: F{}% R{}% S{}%",
                status.overrides.feed, status.overrides.rapid, status.overrides.spindle
            );
            if status.pins.any_limit() {
                println!("Limits:   triggered");
            }
            if let Some(alarm) = status.alarm {
                println!("Alarm:    {}", alarm);
            }
            Ok(true)
        }
        Command::Home => controller.home().await.map_err(anyhow::Error::from),
        Command::Settings => match controller.get_settings().await {
            Ok(settings) => {
                for (key, value) in settings {
                    let name = key
                        .trim_start_matches('$')
                        .parse::<u16>()
                        .map(get_setting_name)
                        .unwrap_or("");
                    println!("{:<6} = {:<12} {}", key, value, name);
                }
                Ok(true)
            }
            Err(e) => Err(e.into()),
        },
        Command::Run { file } => run_program(&controller, file).await,
    };

    controller.disconnect().await?;
    if !outcome? {
        anyhow::bail!("command did not complete successfully");
    }
    Ok(())
}
