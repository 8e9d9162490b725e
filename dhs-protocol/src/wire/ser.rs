use thiserror::Error;

pub type SerializeResult = anyhow::Result<()>;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    #[error("Marker does not belong to this serializer")]
    InvalidMarker,
}

/// A sink for serialized bytes.
///
/// Markers reserve space for a length prefix whose value is only known after the content has
/// been written.
pub trait Serializer {
    type Marker;

    fn write_bytes(&mut self, fragment: &[u8]) -> SerializeResult;

    /// Reserves `length` bytes at the current position.
    fn write_marker(&mut self, length: usize) -> anyhow::Result<Self::Marker>;

    /// Fills a previously reserved region. `fragment` must have the reserved length.
    fn set_marker(&mut self, marker: Self::Marker, fragment: &[u8]) -> SerializeResult;

    /// Number of bytes written since the end of the marker.
    fn marker_distance(&self, marker: &Self::Marker) -> usize;
}

pub trait Serialize {
    type Input: ?Sized;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult;
}

/// Serializes into a growable byte vector.
#[derive(Debug, Default)]
pub struct VecSerializer {
    data: Vec<u8>,
}

/// Offset and length of a reserved region within a [`VecSerializer`].
#[derive(Debug)]
pub struct VecMarker {
    offset: usize,
    length: usize,
}

impl VecSerializer {
    #[must_use]
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(initial_capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn take(self) -> Vec<u8> {
        self.data
    }
}

impl Serializer for VecSerializer {
    type Marker = VecMarker;

    fn write_bytes(&mut self, fragment: &[u8]) -> SerializeResult {
        self.data.extend_from_slice(fragment);
        Ok(())
    }

    fn write_marker(&mut self, length: usize) -> anyhow::Result<Self::Marker> {
        let offset = self.data.len();
        self.data.resize(offset + length, 0);
        Ok(VecMarker { offset, length })
    }

    fn set_marker(&mut self, marker: Self::Marker, fragment: &[u8]) -> SerializeResult {
        if fragment.len() != marker.length {
            anyhow::bail!(SerializeError::InvalidMarker);
        }
        let Some(target) = self
            .data
            .get_mut(marker.offset..marker.offset + marker.length)
        else {
            anyhow::bail!(SerializeError::InvalidMarker);
        };
        target.copy_from_slice(fragment);
        Ok(())
    }

    fn marker_distance(&self, marker: &Self::Marker) -> usize {
        self.data.len() - (marker.offset + marker.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_backfills_length() {
        let mut ser = VecSerializer::new(16);
        ser.write_bytes(&[0xAA]).unwrap();
        let marker = ser.write_marker(2).unwrap();
        ser.write_bytes(b"abc").unwrap();
        let distance = u16::try_from(ser.marker_distance(&marker)).unwrap();
        ser.set_marker(marker, &distance.to_be_bytes()).unwrap();
        assert_eq!(ser.take(), vec![0xAA, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn marker_rejects_wrong_length() {
        let mut ser = VecSerializer::new(4);
        let marker = ser.write_marker(4).unwrap();
        assert!(ser.set_marker(marker, &[1, 2]).is_err());
    }
}
