pub mod serial;
pub mod tcp;
pub mod traits;

pub use serial::{SerialConfig, SerialConnector, DEFAULT_BAUD_RATE};
pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
