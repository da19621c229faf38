use crate::error::FatalError;

/// Random-access big-endian reader over a method's bytecode, with a cursor for sequential reads
#[derive(Clone, Copy)]
pub struct CodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

macro_rules! read_at {
    ($at:ident, $read:ident, $typ:ty) => {
        pub fn $at(&self, offset: usize) -> Result<$typ, FatalError> {
            const SIZE: usize = std::mem::size_of::<$typ>();
            let bytes = offset
                .checked_add(SIZE)
                .and_then(|end| self.bytes.get(offset..end))
                .ok_or(FatalError::PcOutOfRange(offset as i64))?;
            let mut buf = [0; SIZE];
            buf.copy_from_slice(bytes);
            Ok(<$typ>::from_be_bytes(buf))
        }

        pub fn $read(&mut self) -> Result<$typ, FatalError> {
            let value = self.$at(self.pos)?;
            self.pos += std::mem::size_of::<$typ>();
            Ok(value)
        }
    };
}

impl<'a> CodeReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    read_at!(u8_at, read_u8, u8);
    read_at!(i8_at, read_i8, i8);
    read_at!(u16_at, read_u16, u16);
    read_at!(i16_at, read_i16, i16);
    read_at!(u32_at, read_u32, u32);
    read_at!(i32_at, read_i32, i32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_at_offsets() {
        let code = CodeReader::new(&[0xff, 0x80, 0x01, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(code.u8_at(0).unwrap(), 0xff);
        assert_eq!(code.i8_at(0).unwrap(), -1);
        assert_eq!(code.i16_at(1).unwrap(), -32767);
        assert_eq!(code.u16_at(1).unwrap(), 0x8001);
        assert_eq!(code.i32_at(3).unwrap(), 2);
        assert!(code.i32_at(4).is_err());
        assert!(code.u8_at(usize::MAX).is_err());
    }

    #[test]
    fn cursor_advances() {
        let mut code = CodeReader::new(&[0x00, 0x10, 0xfe]);
        assert_eq!(code.read_u16().unwrap(), 0x10);
        assert_eq!(code.position(), 2);
        assert_eq!(code.read_i8().unwrap(), -2);
        assert!(code.read_u8().is_err());
        code.seek(0);
        assert_eq!(code.read_u8().unwrap(), 0);
    }
}
