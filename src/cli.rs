//! Command-line interface for ws-hub.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

use lexopt::prelude::*;

/// Command-line arguments. Unset options leave lower-priority sources alone.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Listen backlog.
    pub backlog: Option<u32>,
    /// Maximum concurrent connections.
    pub max_connections: Option<usize>,
    /// Handshake timeout in seconds.
    pub handshake_timeout: Option<u64>,
    /// Do not answer pings automatically. Recorded on each session; the
    /// tungstenite engine answers pings regardless.
    pub no_pong: bool,
    /// Do not negotiate permessage-deflate. The tungstenite engine never
    /// offers it.
    pub no_deflate: bool,
    /// Admin API port; setting it enables the admin API.
    pub admin_port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                result.host = Some(parse_value(&mut parser, "host")?);
            }
            Short('p') | Long("port") => {
                result.port = Some(parse_value(&mut parser, "port")?);
            }
            Short('b') | Long("backlog") => {
                result.backlog = Some(parse_value(&mut parser, "backlog")?);
            }
            Short('m') | Long("max-connections") => {
                result.max_connections = Some(parse_value(&mut parser, "max-connections")?);
            }
            Short('t') | Long("handshake-timeout") => {
                let secs: u64 = parse_value(&mut parser, "handshake-timeout")?;
                if secs == 0 {
                    return Err(ArgsError::InvalidValue(
                        "handshake-timeout",
                        secs.to_string(),
                    ));
                }
                result.handshake_timeout = Some(secs);
            }
            Long("no-pong") => {
                result.no_pong = true;
            }
            Long("no-deflate") => {
                result.no_deflate = true;
            }
            Short('a') | Long("admin-port") => {
                result.admin_port = Some(parse_value(&mut parser, "admin-port")?);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

fn parse_value<T: std::str::FromStr>(
    parser: &mut lexopt::Parser,
    name: &'static str,
) -> Result<T, ArgsError> {
    let value: String = parser.value()?.parse()?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidValue(name, value))
}

/// Print help message.
pub fn print_help() {
    print!("{}", help_text());
}

fn help_text() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!(
        r#"ws-hub {version}
WebSocket session server

USAGE:
    ws-hub [OPTIONS]

OPTIONS:
    -H, --host <ADDR>               Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>               Port to listen on [default: 8080]
    -b, --backlog <N>               Listen backlog [default: 5]
    -m, --max-connections <N>       Maximum concurrent connections [default: 128]
    -t, --handshake-timeout <SECS>  Upgrade handshake timeout [default: 3]
        --no-pong                   Do not answer pings automatically
                                    (the built-in engine always answers)
        --no-deflate                Do not negotiate permessage-deflate
                                    (the built-in engine never offers it)
    -a, --admin-port <PORT>         Serve the admin API on this port
    -c, --config <FILE>             Path to configuration file (JSON)
    -l, --log-level <LVL>           Log level (error, warn, info, debug, trace)
    -h, --help                      Print help
    -V, --version                   Print version

ENVIRONMENT VARIABLES:
    WS_HUB_HOST                 Host address (overrides config)
    WS_HUB_PORT                 Port number (overrides config)
    WS_HUB_HANDSHAKE_TIMEOUT    Handshake timeout in seconds (overrides config)
    WS_HUB_ADMIN_PORT           Admin API port, enables the admin API
    WS_HUB_LOG_LEVEL            Log level (overrides config)
    RUST_LOG                    Alternative log level setting

EXAMPLES:
    # Echo server on localhost:8080
    ws-hub

    # All interfaces, admin API on 8081
    ws-hub -H 0.0.0.0 -p 9000 -a 8081

    # Start with config file
    ws-hub -c /etc/ws-hub/config.json
"#
    )
}

/// Print version.
pub fn print_version() {
    println!("ws-hub {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
