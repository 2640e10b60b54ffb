use clap::Parser;
use modlink_tools::common::{build_master, init_tracing, parse_bool, ConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "writecoil", about = "Write a single coil (FC05)")]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long)]
    address: u16,
    #[arg(long, value_parser = parse_bool)]
    value: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn).await?;

    master
        .write_single_coil(args.conn.slave, args.address, args.value)
        .await?;

    println!("wrote coil {} => {}", args.address, args.value);
    Ok(())
}
