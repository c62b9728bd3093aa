pub mod encoding;
pub mod transport;

use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{ConfigError, RequestError};
use crate::pdu::{request, response, Pdu};
use crate::types::{
    AddressRange, CommEventCounter, CommEventLog, DeviceIdentification, FileRecord, Indexed,
    ReadDeviceIdCode, ServerId, TransportType, UnitId,
};

use encoding::RegisterEncoding;
use transport::Transport;

/// Client-side configuration.
///
/// The connect timeout belongs to the transport driver (it is a property of
/// how the connection is established), everything request-shaped lives here.
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Slave to address, 1..=247
    pub slave_id: u8,
    /// Deadline bounding the write and read of every exchange
    pub response_timeout: Duration,
    /// Additional attempts after a failed exchange
    pub retry_count: usize,
    /// Fixed sleep between attempts
    pub retry_delay: Duration,
    /// Transparently reconnect a dead transport before an attempt
    pub auto_reconnect: bool,
    /// Byte and word ordering for the multi-register accessors
    pub encoding: RegisterEncoding,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            slave_id: 1,
            response_timeout: Duration::from_secs(1),
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
            auto_reconnect: false,
            encoding: RegisterEncoding::default(),
        }
    }
}

/// A Modbus client bound to one transport driver and one slave address.
///
/// Requests are strictly serialized: a second caller blocks until the
/// running request/response exchange completes. Each public operation
/// validates its parameters locally, runs the retry loop, and parses the
/// response into a typed result.
pub struct Client {
    transport: Mutex<Box<dyn Transport>>,
    unit_id: UnitId,
    retry_count: usize,
    retry_delay: Duration,
    auto_reconnect: bool,
    encoding: RegisterEncoding,
}

impl Client {
    /// Create a client over `transport`. Fails if the slave id is outside
    /// the addressable range.
    pub fn new<T: Transport + 'static>(
        mut transport: T,
        config: ClientConfig,
    ) -> Result<Self, ConfigError> {
        if config.slave_id == 0 || config.slave_id > 247 {
            return Err(ConfigError::InvalidSlaveId(config.slave_id));
        }

        transport.set_timeout(config.response_timeout);
        Ok(Self {
            transport: Mutex::new(Box::new(transport)),
            unit_id: UnitId::new(config.slave_id),
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
            auto_reconnect: config.auto_reconnect,
            encoding: config.encoding,
        })
    }

    /// Establish the transport connection
    pub async fn connect(&self) -> Result<(), RequestError> {
        self.transport.lock().await.connect().await
    }

    /// Close the transport connection
    pub async fn close(&self) -> Result<(), RequestError> {
        self.transport.lock().await.close().await
    }

    /// True when the transport holds a usable connection
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// The wire variant of the underlying transport
    pub async fn transport_type(&self) -> TransportType {
        self.transport.lock().await.transport_type()
    }

    /// The slave address requests are sent to
    pub fn slave_id(&self) -> u8 {
        self.unit_id.value
    }

    /// Change the slave address
    pub fn set_slave_id(&mut self, slave_id: u8) -> Result<(), ConfigError> {
        if slave_id == 0 || slave_id > 247 {
            return Err(ConfigError::InvalidSlaveId(slave_id));
        }
        self.unit_id = UnitId::new(slave_id);
        Ok(())
    }

    /// Change the per-exchange response timeout
    pub async fn set_timeout(&self, timeout: Duration) {
        self.transport.lock().await.set_timeout(timeout);
    }

    /// Change the number of additional attempts after a failure
    pub fn set_retry_count(&mut self, count: usize) {
        self.retry_count = count;
    }

    /// Change the sleep between attempts
    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// Enable or disable transparent reconnection
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    /// The byte/word ordering used by the multi-register accessors
    pub fn encoding(&self) -> RegisterEncoding {
        self.encoding
    }

    /// Change the byte/word ordering used by the multi-register accessors
    pub fn set_encoding(&mut self, encoding: RegisterEncoding) {
        self.encoding = encoding;
    }

    /// The retry engine. Protocol exceptions are final on first sight:
    /// resending an identical request cannot change the server's verdict.
    /// Everything else (I/O, framing, timeouts) is retried with a fixed
    /// delay, reconnecting first when enabled.
    async fn send_with_retry(&self, request: &Pdu) -> Result<Pdu, RequestError> {
        let attempts = self.retry_count + 1;
        let mut last_error = RequestError::NoConnection;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let mut transport = self.transport.lock().await;

            if !transport.is_connected() {
                if !self.auto_reconnect {
                    return Err(RequestError::NoConnection);
                }
                if let Err(err) = transport.connect().await {
                    tracing::warn!("reconnect attempt {} failed: {}", attempt + 1, err);
                    last_error = err;
                    continue;
                }
            }

            match transport.send_request(self.unit_id, request).await {
                Ok(response) => return Ok(response),
                Err(err @ RequestError::Exception(_, _)) => return Err(err),
                Err(err) => {
                    tracing::warn!("attempt {} failed: {}", attempt + 1, err);
                    last_error = err;
                }
            }
        }

        Err(RequestError::ExhaustedRetries(attempts, Box::new(last_error)))
    }

    /// Broadcasts get exactly one attempt and no response processing
    async fn send_broadcast(&self, request: &Pdu) -> Result<(), RequestError> {
        let mut transport = self.transport.lock().await;

        if !transport.is_connected() {
            if !self.auto_reconnect {
                return Err(RequestError::NoConnection);
            }
            transport.connect().await?;
        }

        transport.send_broadcast(request).await
    }

    // --- bit access ---

    /// Read `count` coils starting at `start` (function code 1)
    pub async fn read_coils(&self, start: u16, count: u16) -> Result<Vec<bool>, RequestError> {
        let range = AddressRange::try_from(start, count)?;
        let request = request::read_coils(range)?;
        let response = self.send_with_retry(&request).await?;
        response::read_coils(&response, range)
    }

    /// Read a single coil
    pub async fn read_coil(&self, address: u16) -> Result<bool, RequestError> {
        Ok(self.read_coils(address, 1).await?[0])
    }

    /// Read `count` discrete inputs starting at `start` (function code 2)
    pub async fn read_discrete_inputs(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, RequestError> {
        let range = AddressRange::try_from(start, count)?;
        let request = request::read_discrete_inputs(range)?;
        let response = self.send_with_retry(&request).await?;
        response::read_discrete_inputs(&response, range)
    }

    /// Read a single discrete input
    pub async fn read_discrete_input(&self, address: u16) -> Result<bool, RequestError> {
        Ok(self.read_discrete_inputs(address, 1).await?[0])
    }

    /// Write a single coil (function code 5)
    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<(), RequestError> {
        let request = request::write_single_coil(Indexed::new(address, value))?;
        let response = self.send_with_retry(&request).await?;
        response::write_single_coil(&response, &request)
    }

    /// Write multiple coils starting at `start` (function code 15)
    pub async fn write_multiple_coils(
        &self,
        start: u16,
        values: &[bool],
    ) -> Result<(), RequestError> {
        let request = request::write_multiple_coils(start, values)?;
        let response = self.send_with_retry(&request).await?;
        response::write_multiple_coils(&response, &request)
    }

    // --- register access ---

    /// Read `count` holding registers starting at `start` (function code 3)
    pub async fn read_holding_registers(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_from(start, count)?;
        let request = request::read_holding_registers(range)?;
        let response = self.send_with_retry(&request).await?;
        response::read_holding_registers(&response, range.count)
    }

    /// Read a single holding register
    pub async fn read_holding_register(&self, address: u16) -> Result<u16, RequestError> {
        Ok(self.read_holding_registers(address, 1).await?[0])
    }

    /// Read `count` input registers starting at `start` (function code 4)
    pub async fn read_input_registers(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, RequestError> {
        let range = AddressRange::try_from(start, count)?;
        let request = request::read_input_registers(range)?;
        let response = self.send_with_retry(&request).await?;
        response::read_input_registers(&response, range.count)
    }

    /// Read a single input register
    pub async fn read_input_register(&self, address: u16) -> Result<u16, RequestError> {
        Ok(self.read_input_registers(address, 1).await?[0])
    }

    /// Write a single holding register (function code 6)
    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), RequestError> {
        let request = request::write_single_register(Indexed::new(address, value))?;
        let response = self.send_with_retry(&request).await?;
        response::write_single_register(&response, &request)
    }

    /// Write multiple holding registers starting at `start` (function code 16)
    pub async fn write_multiple_registers(
        &self,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let request = request::write_multiple_registers(start, values)?;
        let response = self.send_with_retry(&request).await?;
        response::write_multiple_registers(&response, &request)
    }

    /// Modify a holding register under AND/OR masks (function code 22).
    /// The server computes `(current & and_mask) | (or_mask & !and_mask)`.
    pub async fn mask_write_register(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), RequestError> {
        let request = request::mask_write_register(address, and_mask, or_mask)?;
        let response = self.send_with_retry(&request).await?;
        response::mask_write_register(&response, &request)
    }

    /// Write `values` at `write_start`, then read `read_count` registers at
    /// `read_start`, in one server-side transaction (function code 23)
    pub async fn read_write_multiple_registers(
        &self,
        read_start: u16,
        read_count: u16,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, RequestError> {
        let read_range = AddressRange::try_from(read_start, read_count)?;
        let request = request::read_write_multiple_registers(read_range, write_start, values)?;
        let response = self.send_with_retry(&request).await?;
        response::read_write_multiple_registers(&response, read_range.count)
    }

    /// Drain up to 31 values from the FIFO queue at `address` (function code 24)
    pub async fn read_fifo_queue(&self, address: u16) -> Result<Vec<u16>, RequestError> {
        let request = request::read_fifo_queue(address)?;
        let response = self.send_with_retry(&request).await?;
        response::read_fifo_queue(&response)
    }

    // --- file records ---

    /// Read file records (function code 20)
    pub async fn read_file_records(
        &self,
        records: &[FileRecord],
    ) -> Result<Vec<FileRecord>, RequestError> {
        let request = request::read_file_record(records)?;
        let response = self.send_with_retry(&request).await?;
        response::read_file_record(&response, records)
    }

    /// Write file records (function code 21)
    pub async fn write_file_records(&self, records: &[FileRecord]) -> Result<(), RequestError> {
        let request = request::write_file_record(records)?;
        let response = self.send_with_retry(&request).await?;
        response::write_file_record(&response, &request)
    }

    // --- diagnostics ---

    /// Read the exception status byte (function code 7)
    pub async fn read_exception_status(&self) -> Result<u8, RequestError> {
        let request = request::read_exception_status()?;
        let response = self.send_with_retry(&request).await?;
        response::read_exception_status(&response)
    }

    /// Run a diagnostic sub-function (function code 8); returns the response
    /// data following the echoed sub-function
    pub async fn diagnostics(
        &self,
        sub_function: u16,
        data: &[u8],
    ) -> Result<Vec<u8>, RequestError> {
        let request = request::diagnostics(sub_function, data)?;
        let response = self.send_with_retry(&request).await?;
        response::diagnostics(&response, sub_function)
    }

    /// Get the communication event counter (function code 11)
    pub async fn get_comm_event_counter(&self) -> Result<CommEventCounter, RequestError> {
        let request = request::get_comm_event_counter()?;
        let response = self.send_with_retry(&request).await?;
        response::get_comm_event_counter(&response)
    }

    /// Get the communication event log (function code 12)
    pub async fn get_comm_event_log(&self) -> Result<CommEventLog, RequestError> {
        let request = request::get_comm_event_log()?;
        let response = self.send_with_retry(&request).await?;
        response::get_comm_event_log(&response)
    }

    /// Report the server id and run status (function code 17)
    pub async fn report_server_id(&self) -> Result<ServerId, RequestError> {
        let request = request::report_server_id()?;
        let response = self.send_with_retry(&request).await?;
        response::report_server_id(&response)
    }

    /// Read device identification objects (function code 43, MEI type 14).
    /// Returns the parsed record, whether more objects follow, and the
    /// object id to continue from.
    pub async fn read_device_identification(
        &self,
        read_code: ReadDeviceIdCode,
        object_id: u8,
    ) -> Result<(DeviceIdentification, bool, u8), RequestError> {
        let request = request::read_device_identification(read_code, object_id)?;
        let response = self.send_with_retry(&request).await?;
        response::read_device_identification(&response)
    }

    // --- broadcast (slave 0, no response expected) ---

    /// Broadcast a single-coil write to every slave
    pub async fn broadcast_write_single_coil(
        &self,
        address: u16,
        value: bool,
    ) -> Result<(), RequestError> {
        let request = request::write_single_coil(Indexed::new(address, value))?;
        self.send_broadcast(&request).await
    }

    /// Broadcast a single-register write to every slave
    pub async fn broadcast_write_single_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), RequestError> {
        let request = request::write_single_register(Indexed::new(address, value))?;
        self.send_broadcast(&request).await
    }

    /// Broadcast a multi-coil write to every slave
    pub async fn broadcast_write_multiple_coils(
        &self,
        start: u16,
        values: &[bool],
    ) -> Result<(), RequestError> {
        let request = request::write_multiple_coils(start, values)?;
        self.send_broadcast(&request).await
    }

    /// Broadcast a multi-register write to every slave
    pub async fn broadcast_write_multiple_registers(
        &self,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let request = request::write_multiple_registers(start, values)?;
        self.send_broadcast(&request).await
    }

    // --- typed accessors over holding registers ---

    /// Read a u32 from two consecutive holding registers
    pub async fn read_u32(&self, address: u16) -> Result<u32, RequestError> {
        let values = self.read_holding_registers(address, 2).await?;
        Ok(self.encoding.decode_u32([values[0], values[1]]))
    }

    /// Read an i32 from two consecutive holding registers
    pub async fn read_i32(&self, address: u16) -> Result<i32, RequestError> {
        Ok(self.read_u32(address).await? as i32)
    }

    /// Read a u64 from four consecutive holding registers
    pub async fn read_u64(&self, address: u16) -> Result<u64, RequestError> {
        let values = self.read_holding_registers(address, 4).await?;
        Ok(self
            .encoding
            .decode_u64([values[0], values[1], values[2], values[3]]))
    }

    /// Read an i64 from four consecutive holding registers
    pub async fn read_i64(&self, address: u16) -> Result<i64, RequestError> {
        Ok(self.read_u64(address).await? as i64)
    }

    /// Read an IEEE-754 single from two consecutive holding registers
    pub async fn read_f32(&self, address: u16) -> Result<f32, RequestError> {
        Ok(f32::from_bits(self.read_u32(address).await?))
    }

    /// Read an IEEE-754 double from four consecutive holding registers
    pub async fn read_f64(&self, address: u16) -> Result<f64, RequestError> {
        Ok(f64::from_bits(self.read_u64(address).await?))
    }

    /// Read a u32 from two consecutive input registers
    pub async fn read_input_u32(&self, address: u16) -> Result<u32, RequestError> {
        let values = self.read_input_registers(address, 2).await?;
        Ok(self.encoding.decode_u32([values[0], values[1]]))
    }

    /// Read an IEEE-754 single from two consecutive input registers
    pub async fn read_input_f32(&self, address: u16) -> Result<f32, RequestError> {
        Ok(f32::from_bits(self.read_input_u32(address).await?))
    }

    /// Write a u32 to two consecutive holding registers
    pub async fn write_u32(&self, address: u16, value: u32) -> Result<(), RequestError> {
        let registers = self.encoding.encode_u32(value);
        self.write_multiple_registers(address, &registers).await
    }

    /// Write an i32 to two consecutive holding registers
    pub async fn write_i32(&self, address: u16, value: i32) -> Result<(), RequestError> {
        self.write_u32(address, value as u32).await
    }

    /// Write a u64 to four consecutive holding registers
    pub async fn write_u64(&self, address: u16, value: u64) -> Result<(), RequestError> {
        let registers = self.encoding.encode_u64(value);
        self.write_multiple_registers(address, &registers).await
    }

    /// Write an i64 to four consecutive holding registers
    pub async fn write_i64(&self, address: u16, value: i64) -> Result<(), RequestError> {
        self.write_u64(address, value as u64).await
    }

    /// Write an IEEE-754 single to two consecutive holding registers
    pub async fn write_f32(&self, address: u16, value: f32) -> Result<(), RequestError> {
        self.write_u32(address, value.to_bits()).await
    }

    /// Write an IEEE-754 double to four consecutive holding registers
    pub async fn write_f64(&self, address: u16, value: f64) -> Result<(), RequestError> {
        self.write_u64(address, value.to_bits()).await
    }

    /// Read `count` raw bytes packed two per holding register
    pub async fn read_bytes(&self, address: u16, count: u16) -> Result<Vec<u8>, RequestError> {
        let register_count = count.div_ceil(2);
        let registers = self.read_holding_registers(address, register_count).await?;
        Ok(self.encoding.registers_to_bytes(&registers, count as usize))
    }

    /// Write raw bytes packed two per holding register; an odd tail byte is
    /// padded with zero
    pub async fn write_bytes(&self, address: u16, data: &[u8]) -> Result<(), RequestError> {
        let registers = self.encoding.bytes_to_registers(data);
        self.write_multiple_registers(address, &registers).await
    }

    /// Read a string of at most `max_length` bytes, truncated at the first
    /// NUL byte
    pub async fn read_string(
        &self,
        address: u16,
        max_length: u16,
    ) -> Result<String, RequestError> {
        let data = self.read_bytes(address, max_length).await?;
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Write a string into a fixed region of `max_length` bytes, zero padded
    pub async fn write_string(
        &self,
        address: u16,
        value: &str,
        max_length: u16,
    ) -> Result<(), RequestError> {
        let mut data = vec![0u8; max_length as usize];
        let bytes = value.as_bytes();
        let length = bytes.len().min(data.len());
        data[..length].copy_from_slice(&bytes[..length]);
        self.write_bytes(address, &data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionCode;
    use crate::pdu::FunctionCode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted transport: fails the first `failures` exchanges, then
    /// answers every read-holding-registers request with a single 0x2A
    struct FlakyTransport {
        connected: bool,
        failures: usize,
        attempts: Arc<AtomicUsize>,
        response: Result<Pdu, RequestError>,
    }

    impl FlakyTransport {
        fn new(failures: usize, response: Result<Pdu, RequestError>) -> (Self, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    connected: true,
                    failures,
                    attempts: attempts.clone(),
                    response,
                },
                attempts,
            )
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn connect(&mut self) -> Result<(), RequestError> {
            self.connected = true;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), RequestError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn send_request(
            &mut self,
            _unit_id: UnitId,
            _request: &Pdu,
        ) -> Result<Pdu, RequestError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(RequestError::Io(std::io::ErrorKind::ConnectionReset));
            }
            self.response.clone()
        }

        async fn send_broadcast(&mut self, _request: &Pdu) -> Result<(), RequestError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) {}

        fn transport_type(&self) -> TransportType {
            TransportType::Tcp
        }
    }

    fn read_response() -> Result<Pdu, RequestError> {
        Ok(Pdu::from_slice(&[0x03, 0x02, 0x00, 0x2A]).unwrap())
    }

    fn config() -> ClientConfig {
        ClientConfig {
            retry_count: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let (transport, attempts) = FlakyTransport::new(2, read_response());
        let client = Client::new(transport, config()).unwrap();

        let values = client.read_holding_registers(0, 1).await.unwrap();
        assert_eq!(values, vec![0x2A]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_carry_the_attempt_count() {
        let (transport, attempts) = FlakyTransport::new(usize::MAX, read_response());
        let client = Client::new(transport, config()).unwrap();

        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            err,
            RequestError::ExhaustedRetries(
                3,
                Box::new(RequestError::Io(std::io::ErrorKind::ConnectionReset))
            )
        );
    }

    #[tokio::test]
    async fn protocol_exceptions_are_never_retried() {
        let exception = RequestError::Exception(
            FunctionCode::ReadHoldingRegisters,
            ExceptionCode::IllegalDataAddress,
        );
        let (transport, attempts) = FlakyTransport::new(0, Err(exception.clone()));
        let client = Client::new(transport, config()).unwrap();

        let err = client.read_holding_registers(0, 1).await.unwrap_err();
        assert_eq!(err, exception);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcasts_are_sent_exactly_once() {
        let (transport, attempts) = FlakyTransport::new(0, read_response());
        let client = Client::new(transport, config()).unwrap();

        client
            .broadcast_write_single_register(0, 0x1234)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slave_id_zero_is_rejected_at_construction() {
        let (transport, _) = FlakyTransport::new(0, read_response());
        let config = ClientConfig {
            slave_id: 0,
            ..Default::default()
        };
        assert!(matches!(
            Client::new(transport, config),
            Err(ConfigError::InvalidSlaveId(0))
        ));
    }

    #[test]
    fn reserved_slave_ids_are_rejected() {
        let (transport, _) = FlakyTransport::new(0, read_response());
        let config = ClientConfig {
            slave_id: 248,
            ..Default::default()
        };
        assert!(matches!(
            Client::new(transport, config),
            Err(ConfigError::InvalidSlaveId(248))
        ));
    }
}
