pub mod unix;

pub use self::unix::{UnixTransport, UnixTransportBuilder, UnixTransportListener};
