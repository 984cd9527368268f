//! The binary image format produced by the assembler and consumed by the VM.
//!
//! Layout (all fields little-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | magic (`0x5950535F`) |
//! | 4      | 4    | ROM start offset (always 8) |
//! | 8      | 4    | code start offset |
//! | ROM    | var  | ROM bytes (NUL-terminated strings, packed) |
//! | code   | var  | instruction stream |

/// Magic number every Spyre binary image begins with.
pub const MAGIC: u32 = 0x5950_535F;

/// A parsed or about-to-be-written Spyre binary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    pub rom: Vec<u8>,
    pub code: Vec<u8>,
}

/// Error produced while decoding a byte buffer as a `BinaryImage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    TooShort { len: usize },
    BadMagic { found: u32 },
    Truncated { expected_at_least: usize, len: usize },
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::TooShort { len } => {
                write!(f, "binary image too short to contain a header ({len} bytes)")
            }
            ImageError::BadMagic { found } => {
                write!(f, "bad magic number 0x{found:08X}, expected 0x{MAGIC:08X}")
            }
            ImageError::Truncated { expected_at_least, len } => write!(
                f,
                "binary image truncated: expected at least {expected_at_least} bytes, found {len}"
            ),
        }
    }
}

impl std::error::Error for ImageError {}

impl BinaryImage {
    pub fn new(rom: Vec<u8>, code: Vec<u8>) -> Self {
        BinaryImage { rom, code }
    }

    /// Byte offset where the ROM section starts; fixed at 8 (after the
    /// 8-byte magic + rom-start header pair below the code-start field).
    pub fn rom_start() -> u32 {
        (std::mem::size_of::<u32>() * 2) as u32
    }

    /// Byte offset where the code section starts, given this image's ROM size.
    pub fn code_start(&self) -> u32 {
        std::mem::size_of::<u32>() as u32 * 3 + self.rom.len() as u32
    }

    /// Serialize to the on-disk binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.rom.len() + self.code.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&Self::rom_start().to_le_bytes());
        out.extend_from_slice(&self.code_start().to_le_bytes());
        out.extend_from_slice(&self.rom);
        out.extend_from_slice(&self.code);
        out
    }

    /// Parse a binary image previously produced by [`BinaryImage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < 12 {
            return Err(ImageError::TooShort { len: bytes.len() });
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(ImageError::BadMagic { found: magic });
        }
        let rom_start = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let code_start = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        if bytes.len() < code_start || code_start < rom_start {
            return Err(ImageError::Truncated {
                expected_at_least: code_start,
                len: bytes.len(),
            });
        }
        let rom = bytes[rom_start..code_start].to_vec();
        let code = bytes[code_start..].to_vec();
        Ok(BinaryImage { rom, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let image = BinaryImage::new(b"hello\0world\0".to_vec(), vec![0x00, 0x01, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let bytes = image.to_bytes();
        let decoded = BinaryImage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn header_offsets_match_reference_layout() {
        let image = BinaryImage::new(vec![1, 2, 3], vec![4, 5]);
        let bytes = image.to_bytes();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), MAGIC);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 12 + 3);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = BinaryImage::new(vec![], vec![1]).to_bytes();
        bytes[0] = 0;
        assert!(matches!(BinaryImage::from_bytes(&bytes), Err(ImageError::BadMagic { .. })));
    }

    #[test]
    fn rejects_truncated_buffers() {
        assert!(matches!(BinaryImage::from_bytes(&[0; 4]), Err(ImageError::TooShort { .. })));
    }
}
