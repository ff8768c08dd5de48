use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::AmpBox;
use crate::error::{Error, Result};

/// Longest key a box may carry
pub const MAX_KEY_LENGTH: usize = 255;

/// Longest value a box field may carry (the u16 length prefix bound)
pub const MAX_VALUE_LENGTH: usize = u16::MAX as usize;

/// Default bound on the total framed size of a single box
pub const DEFAULT_MAX_BOX_SIZE: usize = 1024 * 1024;

const PREFIX_LEN: usize = 2;

/// Length-prefixed box framer
///
/// Every field is a 2-byte big-endian key length and key, then a 2-byte
/// big-endian value length and value. A zero-length key ends the box.
///
/// Decoding is resumable: complete key and value frames are consumed from
/// the buffer as soon as they arrive and kept until the terminator shows up,
/// so a stream may be fragmented at any byte boundary.
#[derive(Debug)]
pub struct BoxCodec {
    current: AmpBox,
    current_size: usize,
    key: Option<String>,
    max_box_size: usize,
}

impl Default for BoxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxCodec {
    pub fn new() -> Self {
        Self::with_max_box_size(DEFAULT_MAX_BOX_SIZE)
    }

    /// Create a codec rejecting boxes larger than `max_box_size` bytes
    pub fn with_max_box_size(max_box_size: usize) -> Self {
        Self {
            current: AmpBox::new(),
            current_size: 0,
            key: None,
            max_box_size,
        }
    }

    /// Whether a box has been partially decoded
    pub fn has_partial(&self) -> bool {
        self.key.is_some() || !self.current.is_empty()
    }

    fn account(&mut self, frame_len: usize) -> Result<()> {
        self.current_size += frame_len;
        if self.current_size > self.max_box_size {
            return Err(Error::framing(format!(
                "Box too large: more than {} bytes",
                self.max_box_size
            )));
        }
        Ok(())
    }
}

impl Decoder for BoxCodec {
    type Item = AmpBox;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AmpBox>> {
        loop {
            if src.len() < PREFIX_LEN {
                return Ok(None);
            }
            let len = u16::from_be_bytes([src[0], src[1]]) as usize;

            if self.key.is_none() {
                if len == 0 {
                    src.advance(PREFIX_LEN);
                    self.current_size = 0;
                    return Ok(Some(std::mem::take(&mut self.current)));
                }
                if len > MAX_KEY_LENGTH {
                    return Err(Error::framing(format!("Key too long: {} bytes", len)));
                }
            }

            let frame_len = PREFIX_LEN + len;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }
            self.account(frame_len)?;
            src.advance(PREFIX_LEN);
            let bytes = src.split_to(len);

            match self.key.take() {
                None => {
                    let key = String::from_utf8(bytes.to_vec())
                        .map_err(|_| Error::framing("Key is not valid UTF-8"))?;
                    self.key = Some(key);
                }
                Some(key) => self.current.insert(key, bytes.to_vec()),
            }
        }
    }
}

impl Encoder<AmpBox> for BoxCodec {
    type Error = Error;

    fn encode(&mut self, item: AmpBox, dst: &mut BytesMut) -> Result<()> {
        encode_into(&item, dst)
    }
}

/// Encode a box into a standalone byte string
pub fn encode_box(ampbox: &AmpBox) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(ampbox, &mut buf)?;
    Ok(buf.freeze())
}

/// Check that every field of a box can be framed
pub fn validate(ampbox: &AmpBox) -> Result<()> {
    for (key, value) in ampbox.iter() {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(Error::framing(format!("Invalid key length: {}", key.len())));
        }
        if value.len() > MAX_VALUE_LENGTH {
            return Err(Error::framing(format!(
                "Value for '{}' too large: {} bytes",
                key,
                value.len()
            )));
        }
    }
    Ok(())
}

fn encode_into(ampbox: &AmpBox, dst: &mut BytesMut) -> Result<()> {
    validate(ampbox)?;
    for (key, value) in ampbox.iter() {
        dst.reserve(2 * PREFIX_LEN + key.len() + value.len());
        dst.put_u16(key.len() as u16);
        dst.put_slice(key.as_bytes());
        dst.put_u16(value.len() as u16);
        dst.put_slice(value);
    }
    dst.put_u16(0);
    Ok(())
}

/// Push-style decoder over a growing byte stream
///
/// Feeds arbitrary fragments to a [`BoxCodec`] and returns every box
/// completed so far.
#[derive(Debug, Default)]
pub struct BoxDecoder {
    codec: BoxCodec,
    buffer: BytesMut,
}

impl BoxDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<AmpBox>> {
        self.buffer.extend_from_slice(bytes);
        let mut boxes = Vec::new();
        while let Some(ampbox) = self.codec.decode(&mut self.buffer)? {
            boxes.push(ampbox);
        }
        Ok(boxes)
    }

    /// Whether bytes of an unfinished box are being held
    pub fn is_pending(&self) -> bool {
        !self.buffer.is_empty() || self.codec.has_partial()
    }
}
