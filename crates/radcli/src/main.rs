//! Fire one RADIUS request through a trunk and print the outcome.
//!
//! Smoke-testing tool for a real home server:
//!
//! ```text
//! radcli --server 127.0.0.1:1812 --secret testing123 \
//!     --code access --pair 1=alice --pair 32=my-nas
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use radproto::{attr, PacketCode, Pair};
use radtrunk::{
    Mode, RadiusCodec, RequestOptions, StatusCheckConfig, TcpConnector, Trunk, TrunkConfig,
    UdpConnector,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodeArg {
    Access,
    Accounting,
    Disconnect,
    Coa,
}

impl From<CodeArg> for PacketCode {
    fn from(code: CodeArg) -> PacketCode {
        match code {
            CodeArg::Access => PacketCode::AccessRequest,
            CodeArg::Accounting => PacketCode::AccountingRequest,
            CodeArg::Disconnect => PacketCode::DisconnectRequest,
            CodeArg::Coa => PacketCode::CoaRequest,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "radcli", about = "Send RADIUS requests through a client trunk")]
struct Args {
    /// Home server address.
    #[arg(long)]
    server: SocketAddr,

    /// Shared secret.
    #[arg(long, env = "RADCLI_SECRET")]
    secret: String,

    /// Packet type to send.
    #[arg(long, value_enum, default_value = "access")]
    code: CodeArg,

    /// Attribute to include, as `number=value`. Text values are used as-is;
    /// prefix with `0x` for raw hex. Repeatable.
    #[arg(long = "pair")]
    pairs: Vec<String>,

    /// Shorthand for `--pair 1=<name>`.
    #[arg(long)]
    user: Option<String>,

    /// Use RADIUS over TCP instead of UDP.
    #[arg(long)]
    tcp: bool,

    /// Number of pooled connections.
    #[arg(long, default_value_t = 1)]
    connections: usize,

    /// Enable Status-Server liveness probing.
    #[arg(long)]
    status_check: bool,

    /// Give up on the exchange after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn parse_pair(spec: &str) -> Result<Pair> {
    let (number, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("pair must look like number=value: {spec}"))?;
    let number: u8 = number
        .parse()
        .with_context(|| format!("bad attribute number in {spec}"))?;
    if number == 0 {
        bail!("attribute number 0 is not valid");
    }

    let bytes = match value.strip_prefix("0x") {
        Some(hex) => {
            if hex.len() % 2 != 0 {
                bail!("hex value with odd length in {spec}");
            }
            (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .with_context(|| format!("bad hex value in {spec}"))?
        }
        None => value.as_bytes().to_vec(),
    };
    Ok(Pair::new(number, bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radcli=info,radtrunk=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut pairs = Vec::new();
    if let Some(user) = &args.user {
        pairs.push(Pair::string(attr::USER_NAME, user));
    }
    for spec in &args.pairs {
        pairs.push(parse_pair(spec)?);
    }

    let mut config = TrunkConfig::new(args.secret.as_bytes())
        .with_mode(Mode::Client)
        .with_connections(args.connections);
    if args.status_check {
        config = config.with_status_check(StatusCheckConfig::default());
    }

    let trunk = if args.tcp {
        Trunk::spawn(config, TcpConnector::new(args.server), RadiusCodec::default())
    } else {
        Trunk::spawn(config, UdpConnector::new(args.server), RadiusCodec::default())
    };

    let code: PacketCode = args.code.into();
    info!(%code, server = %args.server, "sending");

    let outcome = tokio::time::timeout(
        Duration::from_secs(args.timeout),
        trunk.request(code, pairs, RequestOptions::default()),
    )
    .await;

    let result = match outcome {
        Err(_) => {
            trunk.shutdown().await;
            bail!("no outcome within {}s", args.timeout);
        }
        Ok(result) => result,
    };

    match result {
        Ok(completion) => {
            println!("rcode: {}", completion.rcode);
            if let Some(reply) = completion.reply {
                println!("reply: {}", reply.code);
                for pair in reply.pairs {
                    match std::str::from_utf8(&pair.value) {
                        Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control()) => {
                            println!("  {} = {text:?}", pair.attr)
                        }
                        _ => println!("  {} = 0x{}", pair.attr, hex(&pair.value)),
                    }
                }
            }
        }
        Err(error) => println!("error: {error}"),
    }

    trunk.shutdown().await;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing() {
        let pair = parse_pair("1=alice").unwrap();
        assert_eq!(pair.attr, 1);
        assert_eq!(pair.value.as_ref(), b"alice");

        let pair = parse_pair("26=0xdeadbeef").unwrap();
        assert_eq!(pair.attr, 26);
        assert_eq!(pair.value.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);

        assert!(parse_pair("noequals").is_err());
        assert!(parse_pair("0=x").is_err());
        assert!(parse_pair("1=0xabc").is_err());
        assert!(parse_pair("300=x").is_err());
    }
}
