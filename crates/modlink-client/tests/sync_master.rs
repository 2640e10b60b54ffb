use modlink_client::{MasterConfig, SyncModbusMaster};
use modlink_core::ModbusEndian;
use modlink_datalink::{ModbusSlaveService, SlaveConfig, TcpChannelProvider};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;

#[test]
fn sync_master_talks_to_tcp_slave() {
    let (addr_tx, addr_rx) = mpsc::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let slave_thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build");

        runtime.block_on(async move {
            let service = ModbusSlaveService::new(SlaveConfig::default());
            service
                .add_station(1)
                .holding_registers
                .write_registers(0, &[100])
                .expect("fixture register set should succeed");

            let provider = TcpChannelProvider::bind("127.0.0.1:0")
                .await
                .expect("provider should bind");
            addr_tx
                .send(provider.local_addr().expect("local addr should be available"))
                .expect("address should be sent");

            let attached = service.attach(provider.start());
            let _ = shutdown_rx.await;
            service.shutdown();
            attached.abort();
        });
    });

    let addr = addr_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("slave address should arrive");

    let master = SyncModbusMaster::connect_tcp(&addr.to_string(), MasterConfig::default())
        .expect("sync master should connect");

    assert_eq!(
        master
            .read_holding_registers(1, 0, 1)
            .expect("read should succeed"),
        vec![100]
    );

    master
        .write_single_register(1, 0, 1234)
        .expect("write should succeed");
    assert_eq!(
        master
            .read_holding_registers(1, 0, 1)
            .expect("read after write should succeed"),
        vec![1234]
    );

    master
        .write_holding_value(1, 8, 0x0102_0304_0506_0708u64, ModbusEndian::LITTLE)
        .expect("typed write should succeed");
    let value: u64 = master
        .read_holding_value(1, 8, ModbusEndian::LITTLE)
        .expect("typed read should succeed");
    assert_eq!(value, 0x0102_0304_0506_0708);

    assert!(master.read_coils(2, 0, 1).is_err());

    master.close();
    let _ = shutdown_tx.send(());
    slave_thread.join().expect("slave thread should exit");
}
