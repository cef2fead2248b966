//! Domain layer - Core types and port definitions
//!
//! Sizes, domain objects and the traits (ports) that transports and
//! vendor drivers implement.

pub mod attr;
pub mod objects;
pub mod options;
pub mod ports;
pub mod size;

pub use attr::Attr;
pub use objects::*;
pub use options::StringOptions;
pub use ports::*;
pub use size::{AlignedSize, Size, Unit};
