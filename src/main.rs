//! Command-line front-end for the Absorbance 96 SiLA2 client.
//!
//! `launch` starts the vendor application with its server enabled; `run`
//! drives a full readout against a protocol file; `quit` shuts the
//! application down (the only way to close it in headless mode).

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use absorbance96::{
    launch_app, ConnectionConfig, ExportFormat, LaunchConfig, ReadoutWorkflow, RetryPolicy,
    Session,
};

#[derive(Parser)]
#[command(
    name = "absorbance96",
    version,
    about = "Automation client for the Byonoy Absorbance 96 plate reader"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the vendor application with its SiLA2 server enabled
    Launch(LaunchArgs),
    /// Run a full readout against a protocol file
    Run(RunArgs),
    /// Shut down the vendor application
    Quit(ClientArgs),
}

#[derive(Args)]
struct LaunchArgs {
    /// Path to the Absorbance 96 App (auto-detected when omitted)
    #[arg(long)]
    app_path: Option<PathBuf>,
    /// SiLA2 server port
    #[arg(long, default_value_t = absorbance96::config::DEFAULT_PORT)]
    port: u16,
    /// Bind address; 0.0.0.0 exposes the server on the network
    #[arg(long, default_value = absorbance96::config::DEFAULT_HOST)]
    ip: String,
    /// Serve without TLS (not for production)
    #[arg(long)]
    insecure: bool,
    /// Run without a GUI window
    #[arg(long)]
    headless: bool,
    /// Server UUID (generated by the application when omitted)
    #[arg(long)]
    uuid: Option<String>,
    /// CA certificate file (PEM)
    #[arg(long)]
    ca_cert: Option<PathBuf>,
    /// Server certificate file (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,
    /// Server private key file (PEM)
    #[arg(long)]
    key: Option<PathBuf>,
    /// Output file for the server's self-signed certificate
    #[arg(long)]
    out_cert: Option<PathBuf>,
    /// Block until the application exits
    #[arg(long)]
    wait: bool,
}

#[derive(Args)]
struct ClientArgs {
    /// SiLA2 server host
    #[arg(long)]
    host: Option<String>,
    /// SiLA2 server port
    #[arg(long)]
    port: Option<u16>,
    /// Use an insecure connection (no TLS)
    #[arg(long)]
    insecure: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Path or URI of the protocol file (.byop)
    protocol: String,
    /// Export results to this path on the server machine instead of
    /// printing them here
    #[arg(long, short)]
    output: Option<String>,
    /// Result encoding (csv, csv-de, pdf, xlsx, json, xml)
    #[arg(long, short, default_value = "csv")]
    format: String,
    /// Skip the plate insertion/removal prompts
    #[arg(long)]
    no_prompt: bool,
    #[command(flatten)]
    connection: ClientArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("absorbance96=info".parse()?)
                .add_directive("tonic=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Launch(args) => launch(args),
        Commands::Run(args) => run(args).await,
        Commands::Quit(args) => quit(args).await,
    }
}

fn launch(args: LaunchArgs) -> Result<()> {
    let config = LaunchConfig {
        port: args.port,
        ip: args.ip,
        insecure: args.insecure,
        headless: args.headless,
        server_uuid: args.uuid,
        ca_cert: args.ca_cert,
        cert: args.cert,
        key: args.key,
        out_cert: args.out_cert,
    };

    let mut child = launch_app(&config, args.app_path)?;
    println!("Started Absorbance 96 App (pid {})", child.id());
    println!("SiLA2 server: {}:{}", config.ip, config.port);

    if args.wait {
        let status = child
            .wait()
            .context("waiting for the application to exit")?;
        if !status.success() {
            bail!("application exited with {}", status);
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let format: ExportFormat = args.format.parse()?;
    let config = connection_config(&args.connection)?;
    let mut reader = ReadoutWorkflow::new(Session::new(config));

    reader.connect(&RetryPolicy::default()).await?;
    let outcome = drive_readout(&mut reader, &args, format).await;
    reader.disconnect();
    outcome
}

async fn drive_readout(
    reader: &mut ReadoutWorkflow,
    args: &RunArgs,
    format: ExportFormat,
) -> Result<()> {
    reader.load_workspace(&args.protocol).await?;
    reader.prepare_for_readout().await?;

    if !args.no_prompt {
        wait_for_operator("Insert the plate, then press Enter... ")?;
    }
    reader.perform_readout().await?;
    if !args.no_prompt {
        wait_for_operator("Remove the plate, then press Enter... ")?;
    }

    match &args.output {
        Some(path) => {
            reader.export_results(path, format).await?;
            println!("Results exported to {} on the server machine", path);
        }
        None => {
            let data = reader.get_results(format).await?;
            println!("{}", String::from_utf8_lossy(&data));
        }
    }
    Ok(())
}

async fn quit(args: ClientArgs) -> Result<()> {
    let config = connection_config(&args)?;
    let mut reader = ReadoutWorkflow::new(Session::new(config));

    reader.connect(&RetryPolicy::default()).await?;
    let outcome = reader.quit_application().await;
    reader.disconnect();
    outcome?;

    println!("Quit command sent.");
    Ok(())
}

/// CLI flags override the figment-loaded defaults.
fn connection_config(args: &ClientArgs) -> Result<ConnectionConfig> {
    let mut config = ConnectionConfig::load()?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.insecure {
        config.insecure = true;
    }
    Ok(config)
}

fn wait_for_operator(prompt: &str) -> Result<()> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(())
}
