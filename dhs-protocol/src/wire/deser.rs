use anyhow::bail;
use thiserror::Error;

pub type DeserializeResult<R> = anyhow::Result<R>;

#[derive(Error, Debug)]
pub enum DeserializeError {
    #[error("Bad command id: {0:#04x}")]
    BadCommandId(u8),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Unexpected end of input: wanted {wanted} bytes, {remaining} remaining")]
    Eof { wanted: usize, remaining: usize },
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Reads values from a borrowed byte slice, front to back.
#[derive(Debug, Clone)]
pub struct Deserializer<'data> {
    data: &'data [u8],
}

impl<'data> Deserializer<'data> {
    #[must_use]
    pub fn new(data: &'data [u8]) -> Self {
        Self { data }
    }

    /// Takes exactly `count` bytes.
    pub fn take(&mut self, count: usize) -> DeserializeResult<&'data [u8]> {
        if count > self.data.len() {
            bail!(DeserializeError::Eof {
                wanted: count,
                remaining: self.data.len(),
            });
        }
        let (taken, rest) = self.data.split_at(count);
        self.data = rest;
        Ok(taken)
    }

    /// Takes exactly `COUNT` bytes as an array.
    pub fn take_n<const COUNT: usize>(&mut self) -> DeserializeResult<[u8; COUNT]> {
        let taken = self.take(COUNT)?;
        Ok(taken.try_into()?)
    }

    /// Takes everything that's left.
    pub fn take_all(&mut self) -> &'data [u8] {
        let rest = self.data;
        self.data = &[];
        rest
    }

    /// Returns the remaining bytes without consuming them.
    #[must_use]
    pub fn peek_all(&self) -> &'data [u8] {
        self.data
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn has_remaining(&self) -> bool {
        !self.data.is_empty()
    }

    /// Splits off a nested deserializer covering the next `count` bytes.
    pub fn slice(&mut self, count: usize) -> DeserializeResult<Deserializer<'data>> {
        Ok(Deserializer::new(self.take(count)?))
    }
}

pub trait Deserialize: Sized {
    type Output;
    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self::Output>;
}
