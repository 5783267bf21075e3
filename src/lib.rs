//! Portgate: reach services on arbitrary local ports of one host through a
//! single authenticated HTTP endpoint. `/8080/app` is forwarded to
//! `http://<target host>:8080/app` once the visitor holds a session.

pub mod config;
pub mod destination;
pub mod error;
pub mod gateway;
pub mod proxy;
pub mod session;
pub mod templates;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ConfigOverrides, GatewayConfig};
pub use destination::Destination;
pub use gateway::{build_router, GatewayState};
