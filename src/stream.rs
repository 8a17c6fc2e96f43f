//! Byte primitives over an underlying source. All multi-byte reads are
//! normalized to network byte order independently of the host platform, and a
//! read below the requested byte count is a terminal [`DecodeError::Eof`],
//! never retried.

use crate::error::DecodeError;
use crate::header;
use std::io::{self, Read};

pub(crate) struct ByteReader<R: Read> {
    inner: R,
}

impl<R: Read> ByteReader<R> {

    pub fn new(inner: R) -> ByteReader<R> {
        ByteReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads one byte, reporting a clean end of data as `None`. Used at
    /// top-level item boundaries where running out of input is not an error.
    pub fn probe_u8(&mut self) -> Result<Option<u8>, DecodeError> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.probe_u8()?.ok_or(DecodeError::Eof)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32_be(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64_be(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Resolves additional information into an unsigned value: literal below
    /// 24, else the announced number of big-endian follow bytes. The reserved
    /// values 28 through 30 fail, as does the indefinite marker 31, which
    /// callers must intercept before asking for a value.
    pub fn read_uint(&mut self, info: u8) -> Result<u64, DecodeError> {
        match info {
            0..=23 => Ok(info as u64),
            header::FOLLOWS_U8 => Ok(self.read_u8()? as u64),
            header::FOLLOWS_U16 => Ok(self.read_u16_be()? as u64),
            header::FOLLOWS_U32 => Ok(self.read_u32_be()? as u64),
            header::FOLLOWS_U64 => self.read_u64_be(),
            _ => Err(DecodeError::InvalidMinorType(info)),
        }
    }

    /// Reads exactly `len` bytes. The reservation is checked first so that a
    /// forged length cannot abort the process on allocation.
    pub fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

}

#[cfg(test)]
mod tests {
    use super::ByteReader;
    use crate::error::DecodeError;

    #[test]
    fn uint_widths() {
        assert_eq!(5, ByteReader::new([].as_slice()).read_uint(5).unwrap());
        assert_eq!(23, ByteReader::new([].as_slice()).read_uint(23).unwrap());
        assert_eq!(0xff, ByteReader::new([0xff].as_slice()).read_uint(24).unwrap());
        assert_eq!(0x1234, ByteReader::new([0x12, 0x34].as_slice()).read_uint(25).unwrap());
        assert_eq!(0x12345678, ByteReader::new([0x12, 0x34, 0x56, 0x78].as_slice()).read_uint(26).unwrap());
        assert_eq!(u64::MAX, ByteReader::new([0xff; 8].as_slice()).read_uint(27).unwrap());
    }

    #[test]
    fn reserved_info_fails() {
        for info in 28..=30 {
            assert!(matches!(ByteReader::new([].as_slice()).read_uint(info), Err(DecodeError::InvalidMinorType(i)) if i == info));
        }
    }

    #[test]
    fn truncated_follow_bytes() {
        assert!(matches!(ByteReader::new([].as_slice()).read_uint(25), Err(DecodeError::Eof)));
        assert!(matches!(ByteReader::new([0x01].as_slice()).read_uint(26), Err(DecodeError::Eof)));
    }

    #[test]
    fn exact_reads() {
        let mut reader = ByteReader::new([1, 2, 3].as_slice());
        assert_eq!(vec![1, 2, 3], reader.read_exact_vec(3).unwrap());
        let mut reader = ByteReader::new([1, 2].as_slice());
        assert!(matches!(reader.read_exact_vec(3), Err(DecodeError::Eof)));
    }

    #[test]
    fn clean_end_probe() {
        let mut reader = ByteReader::new([].as_slice());
        assert!(reader.probe_u8().unwrap().is_none());
        assert!(matches!(reader.read_u8(), Err(DecodeError::Eof)));
    }

}
