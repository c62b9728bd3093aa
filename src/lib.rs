//! A bidirectional implementation of the [Modbus](https://modbus.org/)
//! application protocol using [Tokio](https://docs.rs/tokio) and Rust's
//! `async/await` syntax.
//!
//! # Features
//!
//! * Panic-free parsing of every frame and PDU
//! * Client and server roles over TCP, TLS, UDP, RTU (serial or TCP) and
//!   ASCII transports
//! * All 19 standard function codes, including file records, FIFO queues,
//!   diagnostics and device identification
//! * Configurable retry, reconnect and timeout policy on the client
//! * Byte-order and word-order aware accessors for 32/64-bit values,
//!   floats, byte blocks and strings
//! * Protocol decoding at the application, frame and physical layers via
//!   [tracing](https://docs.rs/tracing)
//!
//! # Example client
//!
//! ```no_run
//! use ferrobus::client::{Client, ClientConfig};
//! use ferrobus::tcp::client::{TcpOptions, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = TcpTransport::new("127.0.0.1:502", TcpOptions::default());
//!     let client = Client::new(transport, ClientConfig::default())?;
//!
//!     client.connect().await?;
//!     let values = client.read_holding_registers(0, 10).await?;
//!     println!("registers: {values:?}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example server
//!
//! ```no_run
//! use ferrobus::server::{MemoryStore, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new(100, 100, 100, 100);
//!     store.set_holding_register(0, 42)?;
//!
//!     let server = Server::new(store);
//!     let handle = server.spawn_tcp("127.0.0.1:502".parse()?).await?;
//!
//!     // ... serve until shutdown ...
//!     handle
//!         .stop_with_timeout(std::time::Duration::from_secs(5))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![deny(
    // dead_code,
    arithmetic_overflow,
    invalid_type_param_default,
    missing_fragment_specifier,
    mutable_transmutes,
    no_mangle_const_items,
    overflowing_literals,
    patterns_in_fns_without_body,
    pub_use_of_private_extern_crate,
    unknown_crate_types,
    order_dependent_trait_objects,
    improper_ctypes,
    late_bound_lifetime_arguments,
    non_camel_case_types,
    non_shorthand_field_patterns,
    non_snake_case,
    non_upper_case_globals,
    no_mangle_generic_items,
    stable_features,
    type_alias_bounds,
    tyvar_behind_raw_pointer,
    unconditional_recursion,
    unused_comparisons,
    unreachable_pub,
    anonymous_parameters,
    // missing_debug_implementations,
    // missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code, while_true, bare_trait_objects)]

/// client API: the request engine and its transport drivers
pub mod client;
/// public constant values related to the Modbus specification
pub mod constants;
/// protocol decoding levels for tracing output
pub mod decode;
/// error types associated with making and serving requests
pub mod error;
/// Modbus exception codes
pub mod exception;
/// PDU codec types shared by the client and the server
pub mod pdu;
/// serial-line settings and framings
pub mod serial;
/// server API: dispatcher, data-store contract and reference store
pub mod server;
/// TCP and TLS specific types
pub mod tcp;
/// types used in requests and responses
pub mod types;
/// UDP transport driver
pub mod udp;

// internal modules
mod common;

pub use decode::{AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
pub use error::RequestError;
pub use exception::ExceptionCode;
pub use pdu::FunctionCode;
pub use types::{
    AddressRange, CommEventCounter, CommEventLog, DeviceIdentification, DiagnosticCounters,
    FileRecord, Indexed, ReadDeviceIdCode, ServerId, TransportType, UnitId,
};
