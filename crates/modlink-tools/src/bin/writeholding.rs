use clap::Parser;
use modlink_tools::common::{build_master, init_tracing, ConnectionArgs};

#[derive(Debug, Parser)]
#[command(
    name = "writeholding",
    about = "Write one or more holding registers (FC06/FC16)"
)]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    values: Vec<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn).await?;

    if let [value] = args.values.as_slice() {
        master
            .write_single_register(args.conn.slave, args.start, *value)
            .await?;
    } else {
        master
            .write_multiple_registers(args.conn.slave, args.start, &args.values)
            .await?;
    }

    println!(
        "wrote {} register(s) starting at {}",
        args.values.len(),
        args.start
    );
    Ok(())
}
