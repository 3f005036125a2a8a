//! Helpers for explicit network byte-order conversions.
//!
//! The integer and UTF-16 codecs put two's-complement values on the wire
//! most significant byte first.
//!
//! ```
//! use pipeframe::byte_order::{read_network_u16, write_network_i16};
//!
//! assert_eq!(write_network_i16(-2), [0xff, 0xfe]);
//! assert_eq!(read_network_u16([0x00, 0xe9]), 0xe9);
//! ```

macro_rules! network_order {
    ($($ty:ty => $write:ident, $read:ident, $width:literal;)+) => {$(
        #[doc = concat!("Serialise a `", stringify!($ty), "` in network byte order.")]
        #[must_use]
        pub fn $write(value: $ty) -> [u8; $width] {
            #[expect(
                clippy::big_endian_bytes,
                reason = "wire integers are big-endian"
            )]
            value.to_be_bytes()
        }

        #[doc = concat!("Parse a network-order `", stringify!($ty), "`.")]
        #[must_use]
        pub fn $read(bytes: [u8; $width]) -> $ty {
            #[expect(
                clippy::big_endian_bytes,
                reason = "wire integers are big-endian"
            )]
            <$ty>::from_be_bytes(bytes)
        }
    )+};
}

network_order! {
    u16 => write_network_u16, read_network_u16, 2;
    i16 => write_network_i16, read_network_i16, 2;
    i32 => write_network_i32, read_network_i32, 4;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zero(0, [0x00, 0x00])]
    #[case::max(i16::MAX, [0x7f, 0xff])]
    #[case::min(i16::MIN, [0x80, 0x00])]
    #[case::minus_one(-1, [0xff, 0xff])]
    fn i16_wire_layout(#[case] value: i16, #[case] wire: [u8; 2]) {
        assert_eq!(write_network_i16(value), wire);
        assert_eq!(read_network_i16(wire), value);
    }

    #[rstest]
    #[case::max(i32::MAX, [0x7f, 0xff, 0xff, 0xff])]
    #[case::min(i32::MIN, [0x80, 0x00, 0x00, 0x00])]
    #[case::minus_two(-2, [0xff, 0xff, 0xff, 0xfe])]
    fn i32_wire_layout(#[case] value: i32, #[case] wire: [u8; 4]) {
        assert_eq!(write_network_i32(value), wire);
        assert_eq!(read_network_i32(wire), value);
    }

    #[test]
    fn u16_is_big_endian() {
        assert_eq!(read_network_u16([0xab, 0xcd]), 0xabcd);
        assert_eq!(write_network_u16(0x00e9), [0x00, 0xe9]);
    }
}
