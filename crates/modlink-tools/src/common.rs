use clap::Args;
use modlink_client::{MasterConfig, MasterError, ModbusMaster};
use modlink_datalink::Protocol;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 502)]
    pub port: u16,
    /// Framing used on the link: rtu, ascii or tcp.
    #[arg(long, default_value_t = Protocol::Tcp)]
    pub protocol: Protocol,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub timeout: u64,
    #[arg(long, default_value_t = 1)]
    pub slave: u8,
    /// Serial device path; when set, host and port are ignored.
    #[cfg(feature = "serial")]
    #[arg(long)]
    pub serial: Option<String>,
    #[cfg(feature = "serial")]
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
}

impl ConnectionArgs {
    pub fn master_config(&self) -> MasterConfig {
        MasterConfig::default().with_response_timeout(Duration::from_millis(self.timeout))
    }
}

pub async fn build_master(args: &ConnectionArgs) -> Result<ModbusMaster, MasterError> {
    #[cfg(feature = "serial")]
    if let Some(path) = &args.serial {
        return ModbusMaster::open_serial(
            path,
            args.baud,
            &modlink_datalink::SerialConfig::default(),
            args.protocol,
            args.master_config(),
        );
    }

    let addr = format!("{}:{}", args.host, args.port);
    let channel = modlink_datalink::TcpChannel::connect(addr).await?;
    Ok(ModbusMaster::with_config(
        std::sync::Arc::new(channel),
        args.protocol,
        args.master_config(),
    ))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_bool(input: &str) -> Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("invalid bool value: {input}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, ConnectionArgs};
    use clap::Parser;
    use modlink_datalink::Protocol;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        conn: ConnectionArgs,
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool(" On "), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn connection_defaults_and_protocol_flag() {
        let cli = Cli::parse_from(["tool"]);
        assert_eq!(cli.conn.protocol, Protocol::Tcp);
        assert_eq!(cli.conn.port, 502);

        let cli = Cli::parse_from(["tool", "--protocol", "rtu", "--slave", "7"]);
        assert_eq!(cli.conn.protocol, Protocol::Rtu);
        assert_eq!(cli.conn.slave, 7);
    }
}
