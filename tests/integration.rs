use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ferrobus::client::encoding::{ByteOrder, RegisterEncoding, WordOrder};
use ferrobus::client::{Client, ClientConfig};
use ferrobus::constants::diagnostics;
use ferrobus::server::{MemoryStore, Server};
use ferrobus::tcp::client::{TcpOptions, TcpTransport};
use ferrobus::{
    DeviceIdentification, ExceptionCode, FileRecord, FunctionCode, ReadDeviceIdCode, RequestError,
};

fn test_store() -> MemoryStore {
    let store = MemoryStore::new(1000, 1000, 1000, 1000);
    for i in 0..5u16 {
        store.set_holding_register(i, 100 * i).unwrap();
        store.set_input_register(i, 7 * i).unwrap();
    }
    store.set_discrete_input(2, true).unwrap();
    store
}

async fn spawn_server(store: MemoryStore) -> (ferrobus::server::ServerHandle, SocketAddr) {
    let device = DeviceIdentification::basic("Acme Controls", "AC-42", "2.1");
    let server = Server::new(store).device_identification(device);
    let handle = server
        .spawn_tcp("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = handle.local_addr().unwrap();
    (handle, addr)
}

fn client_for(addr: SocketAddr, config: ClientConfig) -> Client {
    let options = TcpOptions {
        response_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    Client::new(TcpTransport::new(&addr.to_string(), options), config).unwrap()
}

async fn connected_client(addr: SocketAddr) -> Client {
    let client = client_for(addr, ClientConfig::default());
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn reads_seeded_holding_registers() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    let values = client.read_holding_registers(0, 5).await.unwrap();
    assert_eq!(values, vec![0, 100, 200, 300, 400]);
}

#[tokio::test]
async fn write_single_coil_round_trip() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    client.write_single_coil(10, true).await.unwrap();
    assert_eq!(client.read_coils(10, 1).await.unwrap(), vec![true]);
    assert!(client.read_coil(10).await.unwrap());

    client.write_single_coil(10, false).await.unwrap();
    assert!(!client.read_coil(10).await.unwrap());
}

#[tokio::test]
async fn reads_discrete_inputs_and_input_registers() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    assert_eq!(
        client.read_discrete_inputs(0, 4).await.unwrap(),
        vec![false, false, true, false]
    );
    assert_eq!(
        client.read_input_registers(0, 5).await.unwrap(),
        vec![0, 7, 14, 21, 28]
    );
}

#[tokio::test]
async fn write_multiple_coils_and_registers() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    let coils: Vec<bool> = (0..19).map(|i| i % 2 == 0).collect();
    client.write_multiple_coils(100, &coils).await.unwrap();
    assert_eq!(client.read_coils(100, 19).await.unwrap(), coils);

    client
        .write_multiple_registers(200, &[11, 22, 33])
        .await
        .unwrap();
    assert_eq!(
        client.read_holding_registers(200, 3).await.unwrap(),
        vec![11, 22, 33]
    );
}

#[tokio::test]
async fn mask_write_register_applies_the_masks() {
    let store = test_store();
    store.set_holding_register(40, 0x0012).unwrap();
    let (_handle, addr) = spawn_server(store).await;
    let client = connected_client(addr).await;

    client.mask_write_register(40, 0x00F2, 0x0025).await.unwrap();
    assert_eq!(client.read_holding_register(40).await.unwrap(), 0x0017);
}

#[tokio::test]
async fn read_write_multiple_observes_overlapping_write() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    let values = client
        .read_write_multiple_registers(0, 5, 3, &[1111, 2222])
        .await
        .unwrap();
    assert_eq!(values, vec![0, 100, 200, 1111, 2222]);
}

#[tokio::test]
async fn out_of_range_read_surfaces_the_exception() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    let err = client.read_holding_registers(999, 2).await.unwrap_err();
    assert_eq!(
        err,
        RequestError::Exception(
            FunctionCode::ReadHoldingRegisters,
            ExceptionCode::IllegalDataAddress
        )
    );
}

#[tokio::test]
async fn fifo_queue_round_trip() {
    let store = test_store();
    store.set_fifo_queue(4, &[0x01B8, 0x1284]).unwrap();
    let (_handle, addr) = spawn_server(store).await;
    let client = connected_client(addr).await;

    assert_eq!(
        client.read_fifo_queue(4).await.unwrap(),
        vec![0x01B8, 0x1284]
    );
    // an unregistered queue reads back empty
    assert_eq!(client.read_fifo_queue(77).await.unwrap(), Vec::<u16>::new());
}

#[tokio::test]
async fn file_records_round_trip() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    client
        .write_file_records(&[
            FileRecord::write(4, 7, vec![0x06AF, 0x04BE, 0x100D]),
            FileRecord::write(3, 9, vec![0x0040]),
        ])
        .await
        .unwrap();

    let records = client
        .read_file_records(&[FileRecord::read(4, 7, 3), FileRecord::read(3, 9, 1)])
        .await
        .unwrap();
    assert_eq!(records[0].record_data, vec![0x06AF, 0x04BE, 0x100D]);
    assert_eq!(records[1].record_data, vec![0x0040]);

    let err = client
        .read_file_records(&[FileRecord::read(9, 0, 1)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RequestError::Exception(
            FunctionCode::ReadFileRecord,
            ExceptionCode::IllegalDataAddress
        )
    );
}

#[tokio::test]
async fn diagnostics_and_counters() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    // echo
    let echoed = client
        .diagnostics(diagnostics::RETURN_QUERY_DATA, &[0xA5, 0x37])
        .await
        .unwrap();
    assert_eq!(echoed, vec![0xA5, 0x37]);

    // counters read back as two big-endian bytes
    let count = client
        .diagnostics(diagnostics::RETURN_BUS_MESSAGE_COUNT, &[0x00, 0x00])
        .await
        .unwrap();
    assert_eq!(count, vec![0x00, 0x00]);

    let counter = client.get_comm_event_counter().await.unwrap();
    assert_eq!(counter.status, 0xFFFF);

    let log = client.get_comm_event_log().await.unwrap();
    assert_eq!(log.status, 0xFFFF);
    assert!(log.events.is_empty());
}

#[tokio::test]
async fn exception_status_and_server_id() {
    let store = test_store();
    store.set_exception_status(0x44);
    store.set_server_id(b"unit under test", true);
    let (_handle, addr) = spawn_server(store).await;
    let client = connected_client(addr).await;

    assert_eq!(client.read_exception_status().await.unwrap(), 0x44);

    let id = client.report_server_id().await.unwrap();
    assert!(id.run_indicator);
    assert_eq!(id.server_id, b"unit under test".to_vec());
}

#[tokio::test]
async fn reads_device_identification() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    let (identification, more_follows, _next) = client
        .read_device_identification(ReadDeviceIdCode::Basic, 0)
        .await
        .unwrap();
    assert!(!more_follows);
    assert_eq!(identification.vendor_name, "Acme Controls");
    assert_eq!(identification.product_code, "AC-42");
    assert_eq!(identification.major_minor_revision, "2.1");
}

#[tokio::test]
async fn broadcast_write_is_applied_but_unanswered() {
    let (handle, addr) = spawn_server(test_store()).await;

    let config = ClientConfig {
        response_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let client = client_for(addr, config);
    client.set_timeout(Duration::from_millis(200)).await;
    client.connect().await.unwrap();

    client
        .broadcast_write_multiple_registers(100, &[1, 2, 3])
        .await
        .unwrap();

    // the write took effect even though no response was read
    assert_eq!(
        client.read_holding_registers(100, 3).await.unwrap(),
        vec![1, 2, 3]
    );

    handle.stop().await;
}

#[tokio::test]
async fn retries_are_spaced_and_counted() {
    // a bound-then-dropped listener yields a connectable address that refuses
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        retry_count: 2,
        retry_delay: Duration::from_millis(50),
        auto_reconnect: true,
        ..Default::default()
    };
    let client = client_for(addr, config);

    let started = Instant::now();
    let err = client.read_holding_registers(0, 1).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        RequestError::ExhaustedRetries(attempts, _) => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    // two sleeps of 50 ms separate the three attempts
    assert!(elapsed >= Duration::from_millis(100));
}

#[tokio::test]
async fn not_connected_without_auto_reconnect_fails_fast() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = client_for(addr, ClientConfig::default());

    assert_eq!(
        client.read_holding_registers(0, 1).await.unwrap_err(),
        RequestError::NoConnection
    );
}

#[tokio::test]
async fn local_validation_fails_without_io() {
    // no server at all: validation must reject before any connection use
    let client = client_for("127.0.0.1:1".parse().unwrap(), ClientConfig::default());

    let err = client.read_holding_registers(0, 126).await.unwrap_err();
    assert!(matches!(err, RequestError::BadRequest(_)));

    let err = client
        .write_multiple_coils(0, &vec![false; 1969])
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::BadRequest(_)));
}

#[tokio::test]
async fn typed_accessors_round_trip() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;

    client.write_u32(300, 0xDEAD_BEEF).await.unwrap();
    assert_eq!(client.read_u32(300).await.unwrap(), 0xDEAD_BEEF);
    // pure big-endian high-word-first layout on the wire
    assert_eq!(
        client.read_holding_registers(300, 2).await.unwrap(),
        vec![0xDEAD, 0xBEEF]
    );

    client.write_i32(310, -123456).await.unwrap();
    assert_eq!(client.read_i32(310).await.unwrap(), -123456);

    client.write_u64(320, 0x0123_4567_89AB_CDEF).await.unwrap();
    assert_eq!(client.read_u64(320).await.unwrap(), 0x0123_4567_89AB_CDEF);

    client.write_f32(330, 3.5).await.unwrap();
    assert_eq!(client.read_f32(330).await.unwrap(), 3.5);

    client.write_f64(340, -0.125).await.unwrap();
    assert_eq!(client.read_f64(340).await.unwrap(), -0.125);

    client
        .write_string(400, "pump station 7", 20)
        .await
        .unwrap();
    assert_eq!(
        client.read_string(400, 20).await.unwrap(),
        "pump station 7"
    );
}

#[tokio::test]
async fn word_and_byte_order_change_the_wire_layout() {
    let (_handle, addr) = spawn_server(test_store()).await;

    let config = ClientConfig {
        encoding: RegisterEncoding {
            byte_order: ByteOrder::Little,
            word_order: WordOrder::LowFirst,
        },
        ..Default::default()
    };
    let client = client_for(addr, config);
    client.connect().await.unwrap();

    client.write_u32(500, 0x1234_5678).await.unwrap();
    assert_eq!(client.read_u32(500).await.unwrap(), 0x1234_5678);
    // low word first, bytes swapped within each word
    assert_eq!(
        client.read_holding_registers(500, 2).await.unwrap(),
        vec![0x7856, 0x3412]
    );
}

#[tokio::test]
async fn concurrent_callers_are_serialized() {
    let (_handle, addr) = spawn_server(test_store()).await;
    let client = std::sync::Arc::new(connected_client(addr).await);

    let mut tasks = Vec::new();
    for i in 0..8u16 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .write_single_register(600 + i, 1000 + i)
                .await
                .unwrap();
            client.read_holding_register(600 + i).await.unwrap()
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), 1000 + i as u16);
    }
}

#[tokio::test]
async fn graceful_shutdown_closes_connections() {
    let (handle, addr) = spawn_server(test_store()).await;
    let client = connected_client(addr).await;
    client.read_holding_registers(0, 1).await.unwrap();

    handle
        .stop_with_timeout(Duration::from_secs(1))
        .await
        .unwrap();

    // the server socket is gone: the next exchange fails and the dead
    // connection is dropped, so the one after that fails fast
    let err = client.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(
        err,
        RequestError::NoConnection
            | RequestError::ExhaustedRetries(_, _)
            | RequestError::ResponseTimeout
    ));
}

#[tokio::test]
async fn unimplemented_capability_yields_illegal_function() {
    use ferrobus::server::DataStore;

    // a store that only serves coils: every other capability keeps the
    // IllegalFunction default
    struct CoilsOnly;
    impl DataStore for CoilsOnly {
        fn read_coils(
            &self,
            range: ferrobus::AddressRange,
        ) -> Result<Vec<bool>, ExceptionCode> {
            Ok(vec![false; range.count as usize])
        }
    }

    let server = Server::new(CoilsOnly);
    let handle = server
        .spawn_tcp("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let client = connected_client(handle.local_addr().unwrap()).await;

    assert_eq!(client.read_coils(0, 4).await.unwrap(), vec![false; 4]);
    assert_eq!(
        client.read_holding_registers(0, 1).await.unwrap_err(),
        RequestError::Exception(
            FunctionCode::ReadHoldingRegisters,
            ExceptionCode::IllegalFunction
        )
    );
}
