use clap::{Parser, ValueEnum};
use modlink_core::ModbusEndian;
use modlink_tools::common::{build_master, init_tracing, ConnectionArgs};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Big,
    Little,
    WordSwap,
    ByteSwap,
}

impl From<Layout> for ModbusEndian {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Big => ModbusEndian::BIG,
            Layout::Little => ModbusEndian::LITTLE,
            Layout::WordSwap => ModbusEndian::WORD_SWAP,
            Layout::ByteSwap => ModbusEndian::BYTE_SWAP,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "readholding", about = "Read holding registers (FC03)")]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long, default_value_t = 1)]
    quantity: u16,
    /// Also decode the block as a 32-bit float in this layout.
    #[arg(long, value_enum)]
    float: Option<Layout>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn).await?;

    let values = master
        .read_holding_registers(args.conn.slave, args.start, args.quantity)
        .await?;
    for (idx, value) in values.iter().enumerate() {
        println!("addr={} value={} (0x{:04X})", args.start + idx as u16, value, value);
    }

    if let Some(layout) = args.float {
        let value: f32 = master
            .read_holding_value(args.conn.slave, args.start, layout.into())
            .await?;
        println!("addr={} f32={}", args.start, value);
    }
    Ok(())
}
