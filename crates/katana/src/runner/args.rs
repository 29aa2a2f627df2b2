use std::collections::BTreeMap;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use katana_payload::FieldNames;
use katana_sdk::{ComponentKind, DispatcherConfig};
use katana_transport::Endpoint;

use super::exit::{transport_error, CliResult};
use super::logging::{LogFormat, LogLevel};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ComponentArg {
    Service,
    Middleware,
}

impl From<ComponentArg> for ComponentKind {
    fn from(arg: ComponentArg) -> Self {
        match arg {
            ComponentArg::Service => ComponentKind::Service,
            ComponentArg::Middleware => ComponentKind::Middleware,
        }
    }
}

/// Command line of a component process, as started by the framework.
#[derive(Parser, Debug, Clone)]
#[command(about = "Run a KATANA component")]
pub struct RunnerArgs {
    /// Component type.
    #[arg(short = 'c', long, value_enum, env = "KATANA_COMPONENT", default_value = "service")]
    pub component: ComponentArg,

    /// Component name.
    #[arg(short = 'n', long, env = "KATANA_NAME")]
    pub name: String,

    /// Component version.
    #[arg(short = 'v', long, env = "KATANA_VERSION")]
    pub version: String,

    /// Framework version the component is compatible with.
    #[arg(short = 'p', long, env = "KATANA_FRAMEWORK_VERSION")]
    pub framework_version: String,

    /// Socket to listen on (`@name`, a path, `ipc://...` or `tcp://host:port`).
    #[arg(short = 's', long, conflicts_with = "tcp")]
    pub socket: Option<String>,

    /// Listen on a local TCP port instead of a socket.
    #[arg(short = 't', long)]
    pub tcp: Option<u16>,

    /// Per-request timeout in milliseconds.
    #[arg(short = 'T', long, value_name = "MS", default_value_t = 30_000)]
    pub timeout: u64,

    /// Use long field names on the wire.
    #[arg(short = 'd', long)]
    pub disable_compact_names: bool,

    /// Log at debug level, including payload values.
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Disable log output.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Component variable, repeatable.
    #[arg(short = 'V', long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Run one action with a JSON command read from stdin, then exit.
    #[arg(short = 'A', long, value_name = "NAME")]
    pub action: Option<String>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl RunnerArgs {
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_flags(self.debug, self.quiet)
    }

    /// The socket to listen on.
    pub fn endpoint(&self) -> CliResult<Endpoint> {
        if let Some(socket) = &self.socket {
            return socket
                .parse()
                .map_err(|err| transport_error("invalid socket", err));
        }
        if let Some(port) = self.tcp {
            return Ok(Endpoint::tcp_port(port));
        }
        let kind = ComponentKind::from(self.component);
        Ok(Endpoint::for_component(kind.as_str(), &self.name, &self.version))
    }

    pub fn variables(&self) -> BTreeMap<String, String> {
        self.vars.iter().cloned().collect()
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let names = (!self.disable_compact_names).then(FieldNames::compact);
        DispatcherConfig::default()
            .with_timeout(Duration::from_millis(self.timeout))
            .with_field_names(names)
            .with_debug(self.debug)
            .with_variables(self.variables())
    }
}

fn parse_var(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got \"{value}\"")),
    }
}
