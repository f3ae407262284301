//! Output buffer filled by the sign function.
//!
//! The callee writes three values into a caller-owned buffer of three
//! fixed-size slots. Each slot carries its own length in its last byte.

/// Memory layout constants for the output buffer
pub mod layout {
    /// Size of one slot (bytes)
    pub const SLOT_SIZE: usize = 0x100;

    /// Number of slots in the buffer
    pub const SLOT_COUNT: usize = 3;

    /// Total buffer size handed to the callee
    pub const BUFFER_SIZE: usize = SLOT_SIZE * SLOT_COUNT;

    // Slot start offsets
    pub const TOKEN: usize = 0;
    pub const EXTRA: usize = SLOT_SIZE;
    pub const SIGNATURE: usize = SLOT_SIZE * 2;

    /// Position of the length byte relative to the start of a slot
    pub const LENGTH_BYTE: usize = SLOT_SIZE - 1;
}

/// Raw buffer passed to the sign function.
pub type OutputBuffer = [u8; layout::BUFFER_SIZE];

/// The three values produced by a successful sign call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOutput {
    pub token: Vec<u8>,
    pub extra: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignOutput {
    /// Decode a buffer filled by the callee.
    ///
    /// Declared lengths are trusted as-is. A length byte can reach at most the
    /// length byte itself, so slicing never leaves the slot.
    pub fn from_buffer(buffer: &OutputBuffer) -> Self {
        Self {
            token: read_slot(buffer, layout::TOKEN).to_vec(),
            extra: read_slot(buffer, layout::EXTRA).to_vec(),
            signature: read_slot(buffer, layout::SIGNATURE).to_vec(),
        }
    }

    /// Upper-case hex encoding of each value, in token/extra/signature order.
    pub fn to_hex(&self) -> [String; 3] {
        [
            hex::encode_upper(&self.token),
            hex::encode_upper(&self.extra),
            hex::encode_upper(&self.signature),
        ]
    }
}

/// Create a zeroed buffer for one call.
pub fn new_buffer() -> OutputBuffer {
    [0u8; layout::BUFFER_SIZE]
}

fn read_slot(buffer: &OutputBuffer, start: usize) -> &[u8] {
    let len = buffer[start + layout::LENGTH_BYTE] as usize;
    &buffer[start..start + len]
}
