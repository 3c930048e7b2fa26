use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rtftp::client::{Client, ClientConfig};
use rtftp::server::{self, Config, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "rtftp", version, about = "TFTP (RFC 1350) server and client")]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a TFTP server
    Serve {
        /// Path to a TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// IP address to listen on
        #[arg(short, long)]
        ip: Option<IpAddr>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory to serve files from
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Refuse write requests
        #[arg(short, long)]
        read_only: bool,

        /// Refuse uploads that would replace an existing file
        #[arg(long)]
        no_overwrite: bool,

        /// Seconds to wait for a reply before retransmitting
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Retransmissions allowed before a transfer is abandoned
        #[arg(long)]
        retries: Option<u32>,

        /// Maximum number of concurrent transfers
        #[arg(long)]
        max_sessions: Option<usize>,
    },
    /// Download a file from a TFTP server
    Get {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1")]
        server: IpAddr,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// File name on the server
        remote: String,

        /// Local path to save to, defaults to the remote name
        local: Option<PathBuf>,
    },
    /// Upload a file to a TFTP server
    Put {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1")]
        server: IpAddr,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Local file to send
        local: PathBuf,

        /// File name on the server, defaults to the local name
        remote: Option<String>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            ip,
            port,
            directory,
            read_only,
            no_overwrite,
            timeout,
            retries,
            max_sessions,
        } => {
            let config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::with_defaults(),
            };
            let mut config = config.merge_cli(ip, port, directory, read_only, no_overwrite);
            if let Some(timeout) = timeout {
                config = config.with_timeout(Duration::from_secs(timeout));
            }
            if let Some(retries) = retries {
                config = config.with_max_retries(retries);
            }
            if let Some(max_sessions) = max_sessions {
                config = config.with_max_sessions(max_sessions);
            }
            server::run(config).await
        }
        Commands::Get {
            server,
            port,
            remote,
            local,
        } => {
            let local = local.unwrap_or_else(|| PathBuf::from(&remote));
            let client = Client::new(ClientConfig::new(server, port))?;
            client.get(&remote, &local).await
        }
        Commands::Put {
            server,
            port,
            local,
            remote,
        } => {
            let remote = match remote {
                Some(name) => name,
                None => local
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        anyhow::anyhow!("cannot derive a remote name from {}", local.display())
                    })?,
            };
            let client = Client::new(ClientConfig::new(server, port))?;
            client.put(&local, &remote).await
        }
    }
}
