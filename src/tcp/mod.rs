pub(crate) mod frame;

pub mod client;

#[cfg(feature = "tls")]
pub mod tls;
