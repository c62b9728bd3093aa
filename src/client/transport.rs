use std::time::Duration;

use async_trait::async_trait;

use crate::error::RequestError;
use crate::pdu::Pdu;
use crate::types::{TransportType, UnitId};

/// Contract implemented by every client-side transport driver.
///
/// A driver owns exactly one logical connection and performs one complete
/// request/response exchange per `send_request` call. Serialization of
/// concurrent callers happens above this trait: the [`crate::client::Client`]
/// holds the driver behind a lock for the duration of each exchange.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection, bounded by the driver's connect timeout.
    /// Connecting while already connected is a no-op.
    async fn connect(&mut self) -> Result<(), RequestError>;

    /// Close the connection, dropping any buffered state
    async fn close(&mut self) -> Result<(), RequestError>;

    /// True when a usable connection exists
    fn is_connected(&self) -> bool;

    /// Send a request to `unit_id` and await its framed response
    async fn send_request(&mut self, unit_id: UnitId, request: &Pdu) -> Result<Pdu, RequestError>;

    /// Send a broadcast request. No response is expected: any bytes that do
    /// arrive are drained and discarded, and read errors are suppressed.
    async fn send_broadcast(&mut self, request: &Pdu) -> Result<(), RequestError>;

    /// Replace the per-exchange response timeout
    fn set_timeout(&mut self, timeout: Duration);

    /// The wire variant this driver speaks
    fn transport_type(&self) -> TransportType;
}
