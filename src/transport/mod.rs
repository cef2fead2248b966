//! Transports behind the driver ports
//!
//! SSH appliances are reached through [`openssh::OpenSshRunner`]; the REST
//! transport lives with the UnityXT driver that speaks its dialect.

pub mod openssh;

pub use openssh::OpenSshRunner;
