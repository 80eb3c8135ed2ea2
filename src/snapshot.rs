//! Deterministic snapshot encoding for device models.
//!
//! The snapshot format uses a small tag-length-value (TLV) encoding to provide:
//! - deterministic byte output (fields emitted in a fixed order)
//! - forward compatibility (unknown tags are skipped on load)
//! - explicit versioning (major/minor) at both format and device level

use thiserror::Error;

const SNAPSHOT_MAGIC: [u8; 4] = *b"DSNP";
const FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

/// Major/minor version pair. Loaders reject a different major version and
/// tolerate any minor version within the same major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot magic mismatch")]
    InvalidMagic,
    #[error("snapshot is for device {found:?}, expected {expected:?}")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported snapshot format version")]
    UnsupportedVersion,
    #[error("unsupported device major version {found}, expected {expected}")]
    UnsupportedDeviceMajorVersion { expected: u16, found: u16 },
    #[error("snapshot is truncated or corrupt")]
    Corrupt,
    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshotting contract for emulated devices.
///
/// Implementations must keep `DEVICE_ID` stable forever and only perform
/// forward-compatible additions within the same major version by adding new
/// TLV fields.
pub trait IoSnapshot {
    const DEVICE_ID: [u8; 4];
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}

/// Serializes a device snapshot: a fixed header followed by TLV fields.
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], device_version: SnapshotVersion) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.major.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.minor.to_le_bytes());
        buf.extend_from_slice(&device_id);
        buf.extend_from_slice(&device_version.major.to_le_bytes());
        buf.extend_from_slice(&device_version.minor.to_le_bytes());
        Self { buf }
    }

    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) {
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&bytes);
    }

    pub fn field_u8(&mut self, tag: u16, value: u8) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_u16(&mut self, tag: u16, value: u16) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, value: u32) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_u64(&mut self, tag: u16, value: u64) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_i32(&mut self, tag: u16, value: i32) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_bool(&mut self, tag: u16, value: bool) {
        self.field_u8(tag, value as u8);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Parses a device snapshot produced by [`SnapshotWriter`].
///
/// All fields are indexed up front; accessors then look fields up by tag so
/// load order is independent of save order and unknown tags are ignored.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    device_version: SnapshotVersion,
    fields: Vec<(u16, &'a [u8])>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> SnapshotResult<Self> {
        if bytes.len() < 16 {
            return Err(SnapshotError::Corrupt);
        }
        if bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format_major = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_major != FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedVersion);
        }
        let found_id: [u8; 4] = [bytes[8], bytes[9], bytes[10], bytes[11]];
        if found_id != expected_device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: expected_device_id,
                found: found_id,
            });
        }
        let device_version = SnapshotVersion::new(
            u16::from_le_bytes([bytes[12], bytes[13]]),
            u16::from_le_bytes([bytes[14], bytes[15]]),
        );

        let mut fields = Vec::new();
        let mut pos = 16;
        while pos < bytes.len() {
            if bytes.len() - pos < 6 {
                return Err(SnapshotError::Corrupt);
            }
            let tag = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
            let len = u32::from_le_bytes([
                bytes[pos + 2],
                bytes[pos + 3],
                bytes[pos + 4],
                bytes[pos + 5],
            ]) as usize;
            pos += 6;
            if bytes.len() - pos < len {
                return Err(SnapshotError::Corrupt);
            }
            fields.push((tag, &bytes[pos..pos + len]));
            pos += len;
        }

        Ok(Self {
            device_version,
            fields,
        })
    }

    pub fn device_version(&self) -> SnapshotVersion {
        self.device_version
    }

    pub fn ensure_device_major(&self, expected: u16) -> SnapshotResult<()> {
        if self.device_version.major != expected {
            return Err(SnapshotError::UnsupportedDeviceMajorVersion {
                expected,
                found: self.device_version.major,
            });
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, buf)| *buf)
    }

    fn fixed<const N: usize>(&self, tag: u16) -> SnapshotResult<Option<[u8; N]>> {
        match self.bytes(tag) {
            None => Ok(None),
            Some(buf) => buf
                .try_into()
                .map(Some)
                .map_err(|_| SnapshotError::InvalidFieldEncoding("fixed-width field")),
        }
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        Ok(self.fixed::<1>(tag)?.map(u8::from_le_bytes))
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        Ok(self.fixed::<2>(tag)?.map(u16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        Ok(self.fixed::<4>(tag)?.map(u32::from_le_bytes))
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        Ok(self.fixed::<8>(tag)?.map(u64::from_le_bytes))
    }

    pub fn i32(&self, tag: u16) -> SnapshotResult<Option<i32>> {
        Ok(self.fixed::<4>(tag)?.map(i32::from_le_bytes))
    }

    pub fn bool(&self, tag: u16) -> SnapshotResult<Option<bool>> {
        Ok(self.u8(tag)?.map(|v| v != 0))
    }
}

/// Plain little-endian byte codec for nested structures stored inside a
/// single TLV field.
pub mod codec {
    use super::{SnapshotError, SnapshotResult};

    #[derive(Default)]
    pub struct Encoder {
        buf: Vec<u8>,
    }

    impl Encoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn u8(mut self, value: u8) -> Self {
            self.buf.push(value);
            self
        }

        pub fn u16(mut self, value: u16) -> Self {
            self.buf.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn u32(mut self, value: u32) -> Self {
            self.buf.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn u64(mut self, value: u64) -> Self {
            self.buf.extend_from_slice(&value.to_le_bytes());
            self
        }

        pub fn i32(self, value: i32) -> Self {
            self.u32(value as u32)
        }

        pub fn bool(self, value: bool) -> Self {
            self.u8(value as u8)
        }

        pub fn finish(self) -> Vec<u8> {
            self.buf
        }
    }

    pub struct Decoder<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Decoder<'a> {
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, pos: 0 }
        }

        fn take<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
            if self.buf.len() - self.pos < N {
                return Err(SnapshotError::Corrupt);
            }
            let out: [u8; N] = self.buf[self.pos..self.pos + N]
                .try_into()
                .map_err(|_| SnapshotError::Corrupt)?;
            self.pos += N;
            Ok(out)
        }

        pub fn u8(&mut self) -> SnapshotResult<u8> {
            Ok(u8::from_le_bytes(self.take::<1>()?))
        }

        pub fn u16(&mut self) -> SnapshotResult<u16> {
            Ok(u16::from_le_bytes(self.take::<2>()?))
        }

        pub fn u32(&mut self) -> SnapshotResult<u32> {
            Ok(u32::from_le_bytes(self.take::<4>()?))
        }

        pub fn u64(&mut self) -> SnapshotResult<u64> {
            Ok(u64::from_le_bytes(self.take::<8>()?))
        }

        pub fn i32(&mut self) -> SnapshotResult<i32> {
            Ok(self.u32()? as i32)
        }

        pub fn bool(&mut self) -> SnapshotResult<bool> {
            Ok(self.u8()? != 0)
        }

        /// Consumes the decoder, failing if trailing bytes remain.
        pub fn finish(self) -> SnapshotResult<()> {
            if self.pos != self.buf.len() {
                return Err(SnapshotError::Corrupt);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::codec::{Decoder, Encoder};
    use super::*;

    const ID: [u8; 4] = *b"TEST";
    const VERSION: SnapshotVersion = SnapshotVersion::new(2, 1);

    #[test]
    fn fields_round_trip() {
        let mut w = SnapshotWriter::new(ID, VERSION);
        w.field_u32(1, 0xdead_beef);
        w.field_i32(2, -42);
        w.field_bool(3, true);
        w.field_bytes(4, vec![1, 2, 3]);
        let bytes = w.finish();

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert_eq!(r.device_version(), VERSION);
        r.ensure_device_major(2).unwrap();
        assert_eq!(r.u32(1).unwrap(), Some(0xdead_beef));
        assert_eq!(r.i32(2).unwrap(), Some(-42));
        assert_eq!(r.bool(3).unwrap(), Some(true));
        assert_eq!(r.bytes(4), Some(&[1u8, 2, 3][..]));
        assert_eq!(r.u32(99).unwrap(), None);
    }

    #[test]
    fn rejects_bad_magic_and_wrong_device() {
        let bytes = SnapshotWriter::new(ID, VERSION).finish();

        let mut garbled = bytes.clone();
        garbled[0] ^= 0xff;
        assert_eq!(
            SnapshotReader::parse(&garbled, ID).unwrap_err(),
            SnapshotError::InvalidMagic
        );

        assert_eq!(
            SnapshotReader::parse(&bytes, *b"OTHR").unwrap_err(),
            SnapshotError::DeviceIdMismatch {
                expected: *b"OTHR",
                found: ID,
            }
        );
    }

    #[test]
    fn rejects_truncation_and_major_mismatch() {
        let mut w = SnapshotWriter::new(ID, VERSION);
        w.field_u64(1, 7);
        let bytes = w.finish();

        assert_eq!(
            SnapshotReader::parse(&bytes[..bytes.len() - 1], ID).unwrap_err(),
            SnapshotError::Corrupt
        );

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert_eq!(
            r.ensure_device_major(1).unwrap_err(),
            SnapshotError::UnsupportedDeviceMajorVersion {
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn fixed_width_mismatch_is_invalid_encoding() {
        let mut w = SnapshotWriter::new(ID, VERSION);
        w.field_u16(1, 7);
        let bytes = w.finish();

        let r = SnapshotReader::parse(&bytes, ID).unwrap();
        assert_eq!(
            r.u32(1).unwrap_err(),
            SnapshotError::InvalidFieldEncoding("fixed-width field")
        );
    }

    #[test]
    fn codec_round_trip_and_eof_check() {
        let buf = Encoder::new().u32(3).i32(-1).bool(true).u64(9).finish();

        let mut d = Decoder::new(&buf);
        assert_eq!(d.u32().unwrap(), 3);
        assert_eq!(d.i32().unwrap(), -1);
        assert!(d.bool().unwrap());
        assert_eq!(d.u64().unwrap(), 9);
        d.finish().unwrap();

        let mut short = Decoder::new(&buf);
        assert_eq!(short.u32().unwrap(), 3);
        assert_eq!(short.finish().unwrap_err(), SnapshotError::Corrupt);
    }
}
