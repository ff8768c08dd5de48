use crate::codec::framing::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
use crate::codec::{AmpBox, Value};
use crate::error::{Error, Result};

pub const COMMAND: &str = "_command";
pub const ASK: &str = "_ask";
pub const ANSWER: &str = "_answer";
pub const ERROR: &str = "_error";
pub const ERROR_CODE: &str = "_error_code";
pub const ERROR_DESCRIPTION: &str = "_error_description";
pub const RESULT: &str = "result";

/// Ordered named arguments of a remote call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    entries: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Remove an argument, keeping its raw value
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Take a required argument converted to `T`
    pub fn take<T: TryFrom<Value, Error = Error>>(&mut self, name: &str) -> Result<T> {
        let value = self
            .remove(name)
            .ok_or_else(|| Error::codec(format!("Missing argument '{}'", name)))?;
        T::try_from(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A decoded box, classified by its protocol keys
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command {
        id: u64,
        name: String,
        args: Arguments,
    },
    Answer {
        id: u64,
        value: Value,
    },
    Error {
        id: u64,
        class: String,
        message: String,
    },
}

impl Message {
    pub fn id(&self) -> u64 {
        match self {
            Message::Command { id, .. } | Message::Answer { id, .. } | Message::Error { id, .. } => {
                *id
            }
        }
    }

    pub fn into_box(self) -> Result<AmpBox> {
        let mut ampbox = AmpBox::new();
        match self {
            Message::Command { id, name, args } => {
                ampbox.insert(COMMAND, name);
                ampbox.insert(ASK, id.to_string());
                for (arg, value) in args.entries {
                    check_argument_name(&arg)?;
                    ampbox.insert(arg, value.encode()?);
                }
            }
            Message::Answer { id, value } => {
                ampbox.insert(ANSWER, id.to_string());
                ampbox.insert(RESULT, value.encode()?);
            }
            Message::Error { id, class, message } => {
                ampbox.insert(ERROR, id.to_string());
                ampbox.insert(ERROR_CODE, truncated(class));
                ampbox.insert(ERROR_DESCRIPTION, truncated(message));
            }
        }
        Ok(ampbox)
    }

    pub fn from_box(ampbox: &AmpBox) -> Result<Self> {
        if let Some(name) = ampbox.get(COMMAND) {
            let name = text(name, COMMAND)?;
            let id = correlation_id(ampbox, ASK)?;
            let mut args = Arguments::new();
            for (key, value) in ampbox.iter().filter(|(k, _)| !k.starts_with('_')) {
                args.entries.push((key.to_string(), Value::decode(value)?));
            }
            return Ok(Message::Command { id, name, args });
        }

        if ampbox.contains_key(ANSWER) {
            let id = correlation_id(ampbox, ANSWER)?;
            let value = match ampbox.get(RESULT) {
                Some(bytes) => Value::decode(bytes)?,
                None => Value::None,
            };
            return Ok(Message::Answer { id, value });
        }

        if ampbox.contains_key(ERROR) {
            let id = correlation_id(ampbox, ERROR)?;
            let class = ampbox
                .get(ERROR_CODE)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| "UnknownError".to_string());
            let message = ampbox
                .get(ERROR_DESCRIPTION)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            return Ok(Message::Error { id, class, message });
        }

        Err(Error::codec("Box is neither a command, an answer nor an error"))
    }
}

fn check_argument_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_KEY_LENGTH {
        return Err(Error::codec(format!("Invalid argument name length: {}", name.len())));
    }
    if name.starts_with('_') {
        return Err(Error::codec(format!("Argument name '{}' is reserved", name)));
    }
    Ok(())
}

/// Cut text to fit a single field, on a char boundary
fn truncated(mut text: String) -> String {
    if text.len() > MAX_VALUE_LENGTH {
        let mut end = MAX_VALUE_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

fn text(bytes: &[u8], key: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::codec(format!("'{}' is not valid UTF-8", key)))
}

fn correlation_id(ampbox: &AmpBox, key: &str) -> Result<u64> {
    ampbox
        .get_str(key)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::codec(format!("Missing or invalid '{}'", key)))
}
