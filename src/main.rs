use clap::Parser;
use iec104ctl::{CommandIssuer, CommandOutcome, CommandRequest, IssueConfig};
use std::net::{IpAddr, SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Issue one IEC 60870-5-104 control command and wait for confirmation.
///
/// Connects to the RTU, activates data transfer, sends a single (type 45) or
/// double (type 46) command at the given information object address and exits
/// once the RTU confirms or a timeout elapses.
#[derive(Parser)]
#[command(name = "iec104ctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Single-shot IEC 60870-5-104 control command client", long_about = None)]
struct Cli {
    /// RTU IP address
    host: String,
    /// RTU TCP port
    port: u16,
    /// Target information object address
    ioa: u16,
    /// ASDU type selector: 45 = single command, 46 = double command
    #[arg(value_name = "TYPE")]
    type_code: u8,
    /// Command value (0 or 1)
    value: u8,
    /// ASDU common address; defaults to the IOA value
    #[arg(long)]
    common_addr: Option<u16>,
    /// TCP connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
    /// STARTDT confirmation timeout in milliseconds
    #[arg(long)]
    dt_timeout_ms: Option<u64>,
    /// Command confirmation timeout in milliseconds
    #[arg(long)]
    command_timeout_ms: Option<u64>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // A wrong argument count is a local usage error, reported before any
    // network activity and with exit code 1 rather than clap's default.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ip: IpAddr = match cli.host.parse() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::error!(host = %cli.host, error = %e, "invalid RTU address");
            std::process::exit(1);
        }
    };
    let addr = SocketAddr::new(ip, cli.port);

    let mut config = IssueConfig::default();
    if let Some(ms) = cli.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    if let Some(ms) = cli.dt_timeout_ms {
        config.dt_confirm_timeout_ms = ms;
    }
    if let Some(ms) = cli.command_timeout_ms {
        config.command_confirm_timeout_ms = ms;
    }

    let request = CommandRequest {
        ioa: cli.ioa,
        type_code: cli.type_code,
        value: cli.value,
        common_addr: cli.common_addr,
    };

    // An interrupt cancels the issuance at the next wait boundary; no
    // protocol-level shutdown (STOPDT) is attempted on the way out.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, exiting");
                cancel.cancel();
            }
        });
    }

    let issuer = CommandIssuer::new(config, cancel);
    let code = match issuer.run(addr, request).await {
        // An unknown-IOA rejection also reaches here: the per-object errors
        // are already logged and the exit code deliberately matches the
        // confirmed case.
        Ok(CommandOutcome::Confirmed) | Ok(CommandOutcome::Rejected) => 0,
        Err(e) => {
            tracing::error!(error = %e, "command issuance failed");
            1
        }
    };
    std::process::exit(code);
}
