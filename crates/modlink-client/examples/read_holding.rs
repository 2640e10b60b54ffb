use modlink_client::{MasterConfig, ModbusMaster};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let master = ModbusMaster::connect_tcp("127.0.0.1:502", MasterConfig::default()).await?;

    let values = master.read_holding_registers(1, 0, 4).await?;
    println!("holding registers: {values:?}");
    Ok(())
}
