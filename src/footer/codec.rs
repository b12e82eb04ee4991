//! Binary layout of the 256-byte trailer appended to combined files.
//!
//! All integers are little-endian. Field order is a wire contract shared with
//! any tool that produces combined files:
//!
//! | offset | size | field                                  |
//! |-------:|-----:|----------------------------------------|
//! |      0 |    8 | reserved                               |
//! |      8 |   16 | leading magic                          |
//! |     24 |    8 | executable length                      |
//! |     32 |    8 | zipfile length                         |
//! |     40 |    8 | footer length                          |
//! |     48 |   64 | BLAKE2b-512 of the executable          |
//! |    112 |   64 | BLAKE2b-512 of the zipfile             |
//! |    176 |   64 | BLAKE2b-512 of the footer (self zeroed)|
//! |    240 |   16 | trailing magic                         |

use blake2::{Blake2b512, Digest};
use byteorder::{ByteOrder, LittleEndian};

/// Total size of the trailer in bytes.
pub const FOOTER_LEN: usize = 256;

/// Width of each magic field; the markers themselves are shorter and zero padded.
pub const MAGIC_FIELD_LEN: usize = 16;

/// Width of every checksum field.
pub const CHECKSUM_LEN: usize = 64;

pub const FOOTER_MAGIC_LEADING: &[u8] = b"\nLibZipFs00\n";
pub const FOOTER_MAGIC_TRAILING: &[u8] = b"\nLibZipFsEnd\n";

const RESERVED_OFFSET: usize = 0;
const MAGIC_LEADING_OFFSET: usize = 8;
const EXECUTABLE_LEN_OFFSET: usize = 24;
const ZIPFILE_LEN_OFFSET: usize = 32;
const FOOTER_LEN_OFFSET: usize = 40;
const EXECUTABLE_CHECKSUM_OFFSET: usize = 48;
const ZIPFILE_CHECKSUM_OFFSET: usize = 112;
const FOOTER_CHECKSUM_OFFSET: usize = 176;
const MAGIC_TRAILING_OFFSET: usize = 240;

/// Decoded trailer of a combined file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub reserved: u64,
    pub magic_leading: [u8; MAGIC_FIELD_LEN],
    pub executable_len: u64,
    pub zipfile_len: u64,
    pub footer_len: u64,
    pub executable_checksum: [u8; CHECKSUM_LEN],
    pub zipfile_checksum: [u8; CHECKSUM_LEN],
    pub footer_checksum: [u8; CHECKSUM_LEN],
    pub magic_trailing: [u8; MAGIC_FIELD_LEN],
}

impl Default for Footer {
    fn default() -> Self {
        Self {
            reserved: 0,
            magic_leading: [0; MAGIC_FIELD_LEN],
            executable_len: 0,
            zipfile_len: 0,
            footer_len: 0,
            executable_checksum: [0; CHECKSUM_LEN],
            zipfile_checksum: [0; CHECKSUM_LEN],
            footer_checksum: [0; CHECKSUM_LEN],
            magic_trailing: [0; MAGIC_FIELD_LEN],
        }
    }
}

fn magic_field(marker: &[u8]) -> [u8; MAGIC_FIELD_LEN] {
    let mut field = [0u8; MAGIC_FIELD_LEN];
    field[..marker.len()].copy_from_slice(marker);
    field
}

impl Footer {
    /// Build a sealed footer: magic markers set and footer checksum filled in.
    pub fn new(
        executable_len: u64,
        zipfile_len: u64,
        executable_checksum: [u8; CHECKSUM_LEN],
        zipfile_checksum: [u8; CHECKSUM_LEN],
    ) -> Self {
        let mut footer = Self {
            reserved: 0,
            magic_leading: magic_field(FOOTER_MAGIC_LEADING),
            executable_len,
            zipfile_len,
            footer_len: FOOTER_LEN as u64,
            executable_checksum,
            zipfile_checksum,
            footer_checksum: [0; CHECKSUM_LEN],
            magic_trailing: magic_field(FOOTER_MAGIC_TRAILING),
        };
        footer.footer_checksum = footer.compute_checksum();
        footer
    }

    /// Serialize into the fixed wire layout.
    pub fn to_bytes(&self) -> [u8; FOOTER_LEN] {
        let mut out = [0u8; FOOTER_LEN];
        LittleEndian::write_u64(&mut out[RESERVED_OFFSET..], self.reserved);
        out[MAGIC_LEADING_OFFSET..][..MAGIC_FIELD_LEN].copy_from_slice(&self.magic_leading);
        LittleEndian::write_u64(&mut out[EXECUTABLE_LEN_OFFSET..], self.executable_len);
        LittleEndian::write_u64(&mut out[ZIPFILE_LEN_OFFSET..], self.zipfile_len);
        LittleEndian::write_u64(&mut out[FOOTER_LEN_OFFSET..], self.footer_len);
        out[EXECUTABLE_CHECKSUM_OFFSET..][..CHECKSUM_LEN].copy_from_slice(&self.executable_checksum);
        out[ZIPFILE_CHECKSUM_OFFSET..][..CHECKSUM_LEN].copy_from_slice(&self.zipfile_checksum);
        out[FOOTER_CHECKSUM_OFFSET..][..CHECKSUM_LEN].copy_from_slice(&self.footer_checksum);
        out[MAGIC_TRAILING_OFFSET..][..MAGIC_FIELD_LEN].copy_from_slice(&self.magic_trailing);
        out
    }

    /// Decode the fixed wire layout. Decoding never fails; validation is
    /// a separate step.
    pub fn from_bytes(bytes: &[u8; FOOTER_LEN]) -> Self {
        let mut footer = Footer {
            reserved: LittleEndian::read_u64(&bytes[RESERVED_OFFSET..]),
            executable_len: LittleEndian::read_u64(&bytes[EXECUTABLE_LEN_OFFSET..]),
            zipfile_len: LittleEndian::read_u64(&bytes[ZIPFILE_LEN_OFFSET..]),
            footer_len: LittleEndian::read_u64(&bytes[FOOTER_LEN_OFFSET..]),
            ..Footer::default()
        };
        footer
            .magic_leading
            .copy_from_slice(&bytes[MAGIC_LEADING_OFFSET..][..MAGIC_FIELD_LEN]);
        footer
            .executable_checksum
            .copy_from_slice(&bytes[EXECUTABLE_CHECKSUM_OFFSET..][..CHECKSUM_LEN]);
        footer
            .zipfile_checksum
            .copy_from_slice(&bytes[ZIPFILE_CHECKSUM_OFFSET..][..CHECKSUM_LEN]);
        footer
            .footer_checksum
            .copy_from_slice(&bytes[FOOTER_CHECKSUM_OFFSET..][..CHECKSUM_LEN]);
        footer
            .magic_trailing
            .copy_from_slice(&bytes[MAGIC_TRAILING_OFFSET..][..MAGIC_FIELD_LEN]);
        footer
    }

    /// BLAKE2b-512 over the serialized footer with the footer checksum zeroed.
    pub fn compute_checksum(&self) -> [u8; CHECKSUM_LEN] {
        let mut bytes = self.to_bytes();
        bytes[FOOTER_CHECKSUM_OFFSET..FOOTER_CHECKSUM_OFFSET + CHECKSUM_LEN].fill(0);
        digest(&bytes)
    }
}

/// BLAKE2b-512 of `data`.
pub fn digest(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&Blake2b512::digest(data));
    out
}

/// Lowercase hex rendering used in diagnostics.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Footer {
        Footer::new(4096, 1234, digest(b"exe"), digest(b"zip"))
    }

    #[test]
    fn parse_inverts_serialize() {
        let footer = sample();
        assert_eq!(Footer::from_bytes(&footer.to_bytes()), footer);
    }

    #[test]
    fn serialize_inverts_parse() {
        let bytes = sample().to_bytes();
        assert_eq!(Footer::from_bytes(&bytes).to_bytes(), bytes);

        // Arbitrary bytes round-trip too, sealed or not.
        let mut noise = [0u8; FOOTER_LEN];
        for (i, b) in noise.iter_mut().enumerate() {
            *b = (i * 37 % 251) as u8;
        }
        assert_eq!(Footer::from_bytes(&noise).to_bytes(), noise);
    }

    #[test]
    fn field_offsets_are_fixed() {
        let footer = sample();
        let bytes = footer.to_bytes();
        assert_eq!(&bytes[0..8], &[0u8; 8]);
        assert_eq!(&bytes[8..8 + FOOTER_MAGIC_LEADING.len()], FOOTER_MAGIC_LEADING);
        assert_eq!(u64::from_le_bytes(bytes[24..32].try_into().unwrap()), 4096);
        assert_eq!(u64::from_le_bytes(bytes[32..40].try_into().unwrap()), 1234);
        assert_eq!(u64::from_le_bytes(bytes[40..48].try_into().unwrap()), 256);
        assert_eq!(&bytes[48..112], &digest(b"exe"));
        assert_eq!(&bytes[112..176], &digest(b"zip"));
        assert_eq!(&bytes[176..240], &footer.footer_checksum);
        assert_eq!(
            &bytes[240..240 + FOOTER_MAGIC_TRAILING.len()],
            FOOTER_MAGIC_TRAILING
        );
    }

    #[test]
    fn checksum_ignores_its_own_field() {
        let mut footer = sample();
        let sealed = footer.footer_checksum;
        footer.footer_checksum = [0xAA; CHECKSUM_LEN];
        assert_eq!(footer.compute_checksum(), sealed);

        footer.zipfile_len += 1;
        assert_ne!(footer.compute_checksum(), sealed);
    }

    #[test]
    fn hex_is_lowercase_pairs() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
