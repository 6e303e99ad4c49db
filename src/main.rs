use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use futures::future::join_all;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cqlmux::cql::consistency::Consistency;
use cqlmux::cql::header::{HeaderFlags, ProtocolVersion};
use cqlmux::cql::operation::Opcode;
use cqlmux::cql::request::{Query, Request, Startup};
use cqlmux::cql::response::supported;
use cqlmux::{Connection, ConnectionConfig};

/// Run CQL statements concurrently over one multiplexed connection.
#[derive(Debug, Parser)]
#[command(name = "cqlmux", version, about)]
struct Cli {
    /// Address of the node to connect to.
    #[arg(short, long, default_value = "127.0.0.1:9042")]
    addr: String,

    /// Native protocol version.
    #[arg(short, long, default_value = "4", value_parser = parse_protocol_version)]
    protocol: ProtocolVersion,

    #[arg(short, long, default_value = "ONE")]
    consistency: Consistency,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 12_000)]
    timeout_ms: u64,

    /// Ask the server to trace every statement.
    #[arg(long)]
    tracing: bool,

    statements: Vec<String>,
}

fn parse_protocol_version(value: &str) -> Result<ProtocolVersion, String> {
    let version = value
        .trim_start_matches(['v', 'V'])
        .parse::<u8>()
        .map_err(|error| error.to_string())?;

    ProtocolVersion::from_u8(version).map_err(|error| error.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let socket = TcpStream::connect(&cli.addr)
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?;
    socket.set_nodelay(true)?;

    let config = ConnectionConfig::new()
        .protocol_version(cli.protocol)
        .request_timeout(Some(Duration::from_millis(cli.timeout_ms)));
    let connection = Connection::new(socket, config);

    let options = connection.call(&Request::Options).await?;
    let supported = supported::decode(options.body)?;
    info!(versions = ?supported.protocol_versions(), "server options");

    let ready = connection
        .call(&Request::Startup(Startup::new()))
        .await?;
    if ready.opcode != Opcode::Ready {
        bail!("expected READY in reply to STARTUP, got {}", ready.opcode);
    }

    let flags = if cli.tracing {
        HeaderFlags::TRACING
    } else {
        HeaderFlags::empty()
    };

    let handles = cli
        .statements
        .iter()
        .map(|statement| {
            let query = Query::new(statement.as_str(), cli.consistency);
            connection.send_with_flags(&Request::Query(query), flags)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (statement, result) in cli.statements.iter().zip(join_all(handles).await) {
        match result {
            Ok(response) => {
                println!("{statement}: {} ({} bytes)", response.opcode, response.body.len());
                if let Some(tracing_id) = response.tracing_id {
                    println!("  tracing session {tracing_id}");
                }
                for warning in &response.warnings {
                    println!("  warning: {warning}");
                }
            }
            Err(error) => println!("{statement}: {error}"),
        }
    }

    connection.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["cqlmux", "SELECT now() FROM system.local"]);

        assert_eq!(cli.addr, "127.0.0.1:9042");
        assert_eq!(cli.protocol, ProtocolVersion::V4);
        assert_eq!(cli.consistency, Consistency::One);
        assert_eq!(cli.statements, ["SELECT now() FROM system.local"]);
    }

    #[test]
    fn parses_protocol_and_consistency() {
        let cli = Cli::parse_from(["cqlmux", "-p", "v3", "-c", "local_quorum", "--tracing"]);

        assert_eq!(cli.protocol, ProtocolVersion::V3);
        assert_eq!(cli.consistency, Consistency::LocalQuorum);
        assert!(cli.tracing);
    }

    #[test]
    fn rejects_unknown_protocol_versions() {
        assert!(parse_protocol_version("9").is_err());
    }
}
