pub mod ampbox;
pub mod framing;
pub mod value;

pub use self::ampbox::AmpBox;
pub use self::framing::{encode_box, BoxCodec, BoxDecoder};
pub use self::value::Value;
