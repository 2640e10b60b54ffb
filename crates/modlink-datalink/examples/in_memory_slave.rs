use modlink_core::pdu::{ModbusRequest, ObjectType};
use modlink_datalink::{
    FrameCodec, ModbusSlaveService, Protocol, SlaveConfig, TcpChannel, TcpChannelProvider,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = ModbusSlaveService::new(SlaveConfig::default());
    service
        .default_device()
        .holding_registers
        .write_registers(0, &[1234])?;

    let provider = TcpChannelProvider::bind("127.0.0.1:0").await?;
    let addr = provider.local_addr()?;
    let attached = service.attach(provider.start());

    let channel = TcpChannel::connect(addr).await?;
    let mut codec = Protocol::Tcp.codec();
    let request = ModbusRequest::read(1, ObjectType::HoldingRegister, 0, 1).with_transaction_id(1);
    modlink_datalink::Channel::write(&channel, &codec.encode_request(&request)?).await?;
    let response = codec
        .decode_response(&channel, &request, Duration::from_secs(1))
        .await?;

    println!("response: {:?}", response.body());

    service.shutdown();
    attached.abort();
    Ok(())
}
