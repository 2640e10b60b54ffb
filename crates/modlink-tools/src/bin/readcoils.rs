use clap::Parser;
use modlink_tools::common::{build_master, init_tracing, ConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readcoils", about = "Read coils (FC01)")]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long)]
    quantity: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn).await?;

    let values = master
        .read_coils(args.conn.slave, args.start, args.quantity)
        .await?;

    for (idx, value) in values.iter().enumerate() {
        println!("coil={} value={}", args.start + idx as u16, value);
    }
    Ok(())
}
