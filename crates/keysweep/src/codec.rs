use crate::{DES_KEY_SPACE, KeyId};

/// The opaque 8-byte key blob a [`Cipher`](crate::Cipher) consumes.
pub type KeyBlob = [u8; 8];

/// Maps a [`KeyId`] to the key blob the cipher expects.
///
/// Both encodings are pure and injective over their domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// The full 64-bit id as big-endian bytes.
    ///
    /// DES ignores the low bit of every key byte, so under this encoding
    /// groups of 256 ids decrypt identically. Use [`Codec::Des56`] to search
    /// each effective DES key exactly once.
    #[default]
    BigEndian,
    /// A 56-bit id spread over the high seven bits of each byte, with the
    /// low bit set for odd parity.
    Des56,
}

impl Codec {
    /// Exclusive upper bound of the ids this codec can encode, if any.
    pub const fn domain_bound(self) -> Option<KeyId> {
        match self {
            Self::BigEndian => None,
            Self::Des56 => Some(DES_KEY_SPACE),
        }
    }

    /// Encodes `key` into a key blob.
    ///
    /// For [`Codec::Des56`] bits above the 56th are ignored; callers keep
    /// ids inside [`Codec::domain_bound`].
    pub const fn encode(self, key: KeyId) -> KeyBlob {
        match self {
            Self::BigEndian => key.to_be_bytes(),
            Self::Des56 => {
                let mut blob = [0_u8; 8];
                let mut i = 0;
                while i < 8 {
                    let group = ((key >> (7 * (7 - i))) & 0x7f) as u8;
                    blob[i] = with_odd_parity(group << 1);
                    i += 1;
                }
                blob
            }
        }
    }

    /// Inverts [`Codec::encode`].
    ///
    /// Returns `None` if `blob` is not in the image of this codec (for
    /// [`Codec::Des56`], a byte with even parity).
    pub fn decode(self, blob: &KeyBlob) -> Option<KeyId> {
        match self {
            Self::BigEndian => Some(KeyId::from_be_bytes(*blob)),
            Self::Des56 => blob.iter().try_fold(0_u64, |acc, &byte| {
                (with_odd_parity(byte) == byte).then(|| (acc << 7) | u64::from(byte >> 1))
            }),
        }
    }
}

/// Sets the low bit of `byte` so the byte has an odd number of set bits.
pub(crate) const fn with_odd_parity(byte: u8) -> u8 {
    let high = byte & 0xfe;
    if high.count_ones() % 2 == 0 {
        high | 1
    } else {
        high
    }
}
