//! Bounds-checked fixed-layout reads over untrusted byte buffers.
//!
//! Records are `zerocopy` structs made only of byte arrays and little-endian
//! integer wrappers, so they have alignment 1 and no padding: a record can be
//! viewed at any offset of a buffer copied verbatim from disk.

use core::mem::size_of;
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

use crate::error::FormatError;

/// View the `T` record starting at byte `offset` of `bytes`.
pub fn read_record<T: FromBytes + Unaligned>(bytes: &[u8], offset: u64) -> Result<&T, FormatError> {
    let truncated = FormatError::Truncated {
        offset,
        len: size_of::<T>() as u64,
    };
    let start = usize::try_from(offset)
        .ok()
        .filter(|&start| start <= bytes.len())
        .ok_or(truncated)?;
    LayoutVerified::<_, T>::new_unaligned_from_prefix(&bytes[start..])
        .map(|(record, _)| record.into_ref())
        .ok_or(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::byteorder::{LittleEndian, U16, U32};

    #[derive(FromBytes, Unaligned)]
    #[repr(C)]
    struct Pair {
        a: U16<LittleEndian>,
        b: U32<LittleEndian>,
    }

    #[test]
    fn reads_at_odd_offsets() {
        let bytes = [0xFF, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let pair: &Pair = read_record(&bytes, 1).unwrap();
        assert_eq!(pair.a.get(), 0x1234);
        assert_eq!(pair.b.get(), 0x1234_5678);
    }

    #[test]
    fn rejects_reads_past_the_end() {
        let bytes = [0u8; 6];
        assert!(read_record::<Pair>(&bytes, 0).is_ok());
        assert_eq!(
            read_record::<Pair>(&bytes, 1).err(),
            Some(FormatError::Truncated { offset: 1, len: 6 })
        );
        assert!(read_record::<Pair>(&bytes, 7).is_err());
        assert!(read_record::<Pair>(&bytes, u64::MAX).is_err());
    }
}
