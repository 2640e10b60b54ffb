use clap::Parser;
use modlink_datalink::{ModbusSlaveService, Protocol, SlaveConfig, TcpChannelProvider};
use modlink_tools::common::init_tracing;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "slavesim", about = "Serve in-memory Modbus slave stations over TCP")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5020")]
    listen: String,
    /// Framing expected from masters: rtu, ascii or tcp.
    #[arg(long, default_value_t = Protocol::Tcp)]
    protocol: Protocol,
    /// Station addresses to serve; station 1 answers when none are given.
    #[arg(long, value_delimiter = ',')]
    stations: Vec<u8>,
    /// Registers and bits pre-allocated from address 0 on every station.
    #[arg(long, default_value_t = 100)]
    size: u16,
    /// Refuse writes outside the pre-allocated range.
    #[arg(long)]
    fixed: bool,
    /// Seconds of silence before a connection is dropped.
    #[arg(long, default_value_t = 60)]
    idle: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = SlaveConfig::default()
        .with_protocol(args.protocol)
        .with_inactivity_timeout(Some(Duration::from_secs(args.idle)));
    let service = ModbusSlaveService::new(config);

    let devices = if args.stations.is_empty() {
        vec![service.default_device()]
    } else {
        args.stations
            .iter()
            .map(|address| service.add_station(*address))
            .collect()
    };
    let size = usize::from(args.size);
    for device in &devices {
        device.coils.allocate(0, size)?;
        device.discrete_inputs.allocate(0, size)?;
        device.holding_registers.allocate(0, size)?;
        device.input_registers.allocate(0, size)?;
        device.set_auto_allocation(!args.fixed);
    }

    let provider = TcpChannelProvider::bind(args.listen.as_str()).await?;
    info!(addr = %provider.local_addr()?, protocol = %args.protocol, "slave simulator listening");
    service.attach(provider.start()).await?;
    Ok(())
}
