//! Interactive console
//!
//! A line-oriented control surface over the multiplexer. The binary wires it
//! to stdin and stdout; tests drive it with in-memory streams.

use crate::config::UpstreamRegistry;
use crate::mux::Multiplexer;
use crate::transport::resolve_endpoint;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const HELP: &str = "\
commands:
  ls                          list connections
  update <client> <upstream>  migrate a client to an upstream name or address
  set <proxy> <upstream>      migrate the connection behind a proxy endpoint
  default <upstream>          change the upstream for new clients
  help                        show this help
";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `ls`
    List,
    /// `update <client> <upstream>`
    Update {
        /// Client endpoint
        client: String,
        /// Upstream name or endpoint
        upstream: String,
    },
    /// `set <proxy> <upstream>`
    Set {
        /// Local endpoint of the connection's upstream socket
        proxy: String,
        /// Upstream name
        upstream: String,
    },
    /// `default <upstream>`
    Default {
        /// Upstream name or endpoint
        upstream: String,
    },
    /// `help`
    Help,
    /// A known command with the wrong arguments
    Usage(&'static str),
    /// Anything else
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one line; `None` for blank lines
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = tokens.split_first()?;

        let cmd = match (*name, args) {
            ("ls", _) => ConsoleCommand::List,
            ("help", _) => ConsoleCommand::Help,
            ("update", [client, upstream, ..]) => ConsoleCommand::Update {
                client: client.to_string(),
                upstream: upstream.to_string(),
            },
            ("update", _) => ConsoleCommand::Usage("update <client> <upstream>"),
            ("set", [proxy, upstream, ..]) => ConsoleCommand::Set {
                proxy: proxy.to_string(),
                upstream: upstream.to_string(),
            },
            ("set", _) => ConsoleCommand::Usage("set <proxy> <upstream>"),
            ("default", [upstream, ..]) => ConsoleCommand::Default {
                upstream: upstream.to_string(),
            },
            ("default", _) => ConsoleCommand::Usage("default <upstream>"),
            (other, _) => ConsoleCommand::Unknown(other.to_string()),
        };

        Some(cmd)
    }
}

/// Run the console until the reader reaches EOF.
///
/// Command failures are reported on `writer`; only I/O errors on the
/// streams themselves end the console early.
pub async fn run_console<R, W>(
    mux: Arc<Multiplexer>,
    registry: &UpstreamRegistry,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        writer.write_all(b"> ").await?;
        writer.flush().await?;

        let Some(line) = lines
            .next_line()
            .await
            .with_context(|| "Failed to read console input")?
        else {
            break;
        };

        if let Some(cmd) = ConsoleCommand::parse(&line) {
            debug!("Console command: {:?}", cmd);
            let output = execute(&mux, registry, cmd).await;
            writer.write_all(output.as_bytes()).await?;
        }
    }

    writer.flush().await?;
    debug!("Console input closed");
    Ok(())
}

/// Execute a command and render its output
pub async fn execute(mux: &Multiplexer, registry: &UpstreamRegistry, cmd: ConsoleCommand) -> String {
    match cmd {
        ConsoleCommand::List => {
            let conns = mux.list_connections().await;
            if conns.is_empty() {
                return "no connections\n".to_string();
            }
            conns
                .iter()
                .enumerate()
                .map(|(i, info)| format!("[{}] {}\n", i, info))
                .collect()
        }
        ConsoleCommand::Update { client, upstream } => {
            let client = match resolve_endpoint(&client).await {
                Ok(addr) => addr,
                Err(e) => return format!("invalid client: {}\n", e),
            };
            let Some(conn) = mux.find_connection_by_client(client).await else {
                return "connection not found\n".to_string();
            };
            match registry.lookup(&upstream).await {
                Ok(addr) => {
                    conn.set_next_upstream(addr).await;
                    info!("Console: client {} next upstream {}", client, addr);
                    String::new()
                }
                Err(e) => format!("invalid upstream: {}\n", e),
            }
        }
        ConsoleCommand::Set { proxy, upstream } => {
            let proxy = match resolve_endpoint(&proxy).await {
                Ok(addr) => addr,
                Err(e) => return format!("invalid proxy: {}\n", e),
            };
            let Some(addr) = registry.get(&upstream) else {
                return "upstream not found\n".to_string();
            };
            if mux.set_upstream_by_proxy(proxy, addr).await {
                String::new()
            } else {
                "connection not found\n".to_string()
            }
        }
        ConsoleCommand::Default { upstream } => match registry.lookup(&upstream).await {
            Ok(addr) => {
                mux.set_default_upstream(addr).await;
                String::new()
            }
            Err(e) => format!("invalid upstream: {}\n", e),
        },
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Usage(usage) => format!("usage: {}\n", usage),
        ConsoleCommand::Unknown(name) => {
            format!("unknown command: {} (try `help`)\n", name)
        }
    }
}
