use std::fmt::Display;

use crate::error::EncodingError;

pub const MIDSTATE_LEN: usize = 32;
pub const DATA_TAIL_LEN: usize = 32;
pub const PAYLOAD_LEN: usize = MIDSTATE_LEN + DATA_TAIL_LEN;
/// Length of the nonce an Icarus device answers with.
pub const NONCE_LEN: usize = 4;

/// The last 32 bytes of the work are taken from this offset of the 128 byte block.
const DATA_TAIL_OFFSET: usize = 64;

const HEX_PREFIX: &str = "0x";

/// The 64 byte work unit sent to an Icarus device.
///
/// Both halves are stored in the byte order the device expects, which is the
/// reverse of the order in which they appear in a block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IcarusPayload([u8; PAYLOAD_LEN]);

impl IcarusPayload {
    /// Builds the payload from a midstate and a block, both as hex strings.
    pub fn from_hex(midstate: &str, block: &str) -> Result<IcarusPayload, EncodingError> {
        let midstate = hex::decode(midstate)?;
        let block = hex::decode(block)?;
        IcarusPayload::from_parts(&midstate, &block)
    }

    /// Builds the payload from the raw midstate and raw block bytes.
    pub fn from_parts(midstate: &[u8], block: &[u8]) -> Result<IcarusPayload, EncodingError> {
        if midstate.len() != MIDSTATE_LEN {
            return Err(EncodingError::InvalidLength {
                expected: MIDSTATE_LEN,
                got: midstate.len(),
            });
        }
        let tail_end = DATA_TAIL_OFFSET + DATA_TAIL_LEN;
        if block.len() < tail_end {
            return Err(EncodingError::InvalidLength {
                expected: tail_end,
                got: block.len(),
            });
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..MIDSTATE_LEN].copy_from_slice(midstate);
        payload[MIDSTATE_LEN..].copy_from_slice(&block[DATA_TAIL_OFFSET..tail_end]);
        payload[..MIDSTATE_LEN].reverse();
        payload[MIDSTATE_LEN..].reverse();
        Ok(IcarusPayload(payload))
    }

    /// Takes an already prepared payload verbatim.
    pub fn from_wire_hex(payload: &str) -> Result<IcarusPayload, EncodingError> {
        let mut buf = [0u8; PAYLOAD_LEN];
        hex::decode_to_slice(payload, &mut buf).map_err(|err| match err {
            hex::FromHexError::InvalidStringLength => EncodingError::InvalidLength {
                expected: PAYLOAD_LEN,
                got: payload.len() / 2,
            },
            other => other.into(),
        })?;
        Ok(IcarusPayload(buf))
    }

    pub fn midstate(&self) -> &[u8] {
        &self.0[..MIDSTATE_LEN]
    }

    pub fn data_tail(&self) -> &[u8] {
        &self.0[MIDSTATE_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.0
    }
}

impl Display for IcarusPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Known work with a known answer, used to check that a device hashes correctly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fixture {
    pub payload: IcarusPayload,
    pub expected: [u8; NONCE_LEN],
}

const FIXTURE_BLOCK: &str = "0000000120c8222d0497a7ab44a1a2c7bf39de941c9970b1dc7cdc400000079700000000e88aabe1f353238c668d8a4df9318e614c10c474f8cdf8bc5f6397b946c33d7c4e7242c31a098ea500000000000000800000000000000000000000000000000000000000000000000000000000000000000000000000000080020000";
const FIXTURE_MIDSTATE: &str = "33c5bf5751ec7f7e056443b5aee3800331432c83f404d9de38b94ecbf907b92d";
const FIXTURE_EXPECTED: [u8; NONCE_LEN] = [0x06, 0x3c, 0x5e, 0x01];

const FIXTURE_WIRE: &str = "ce92099c5a80bb81c52990d5c0924c625fd25a535640607d5a4bdf8174e2c8d500000000000000000000000080000000000000000b290c1a42313b4f21b5bcb8";
const FIXTURE_WIRE_EXPECTED: [u8; NONCE_LEN] = [0x8e, 0x0b, 0x31, 0xc5];

/// The two test vectors a working Icarus device answers with known nonces.
///
/// The first is built from a block and its midstate, the second is already in wire order.
pub fn fixtures() -> Result<[Fixture; 2], EncodingError> {
    Ok([
        Fixture {
            payload: IcarusPayload::from_hex(FIXTURE_MIDSTATE, FIXTURE_BLOCK)?,
            expected: FIXTURE_EXPECTED,
        },
        Fixture {
            payload: IcarusPayload::from_wire_hex(FIXTURE_WIRE)?,
            expected: FIXTURE_WIRE_EXPECTED,
        },
    ])
}

/// Concatenates command line tokens into a raw payload.
///
/// Tokens starting with `0x` are hex-decoded, everything else is sent as its
/// Latin-1 bytes.
pub fn encode_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<u8>, EncodingError> {
    let mut payload = Vec::new();
    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix(HEX_PREFIX) {
            Some(digits) => payload.extend(hex::decode(digits)?),
            None => {
                for c in token.chars() {
                    let byte = u8::try_from(u32::from(c))
                        .map_err(|_| EncodingError::NotLatin1 { c })?;
                    payload.push(byte);
                }
            }
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod test {
    use super::*;

    fn reversed(bytes: &[u8]) -> Vec<u8> {
        bytes.iter().rev().copied().collect()
    }

    #[test]
    fn payload_halves_are_reversed() {
        let payload = IcarusPayload::from_hex(FIXTURE_MIDSTATE, FIXTURE_BLOCK).unwrap();
        let midstate = hex::decode(FIXTURE_MIDSTATE).unwrap();
        let block = hex::decode(FIXTURE_BLOCK).unwrap();

        assert_eq!(payload.as_bytes().len(), 64);
        assert_eq!(payload.midstate(), &reversed(&midstate)[..]);
        assert_eq!(payload.data_tail(), &reversed(&block[64..96])[..]);
    }

    #[test]
    fn fixture_payload_on_the_wire() {
        let [first, second] = fixtures().unwrap();
        assert_eq!(
            first.payload.to_string(),
            "2db907f9cb4eb938ded904f4832c43310380e3aeb54364057e7fec5157bfc533\
             0000000000000000000000008000000000000000a58e091ac342724e7c3dc346"
        );
        assert_eq!(first.expected, [0x06, 0x3c, 0x5e, 0x01]);
        assert_eq!(second.payload.to_string(), FIXTURE_WIRE);
        assert_eq!(second.expected, [0x8e, 0x0b, 0x31, 0xc5]);
    }

    #[test]
    fn short_block_is_rejected() {
        match IcarusPayload::from_hex(FIXTURE_MIDSTATE, &FIXTURE_BLOCK[..128]) {
            Err(EncodingError::InvalidLength { expected, got }) => {
                assert_eq!(expected, 96);
                assert_eq!(got, 64);
            }
            other => panic!("expected InvalidLength, got {:?}", other),
        }
    }

    #[test]
    fn hex_token() {
        let payload = encode_tokens(&["0x68656c6c6f20776f726c640a"]).unwrap();
        assert_eq!(payload, b"hello world\n".to_vec());
    }

    #[test]
    fn mixed_tokens_keep_order() {
        let payload = encode_tokens(&["0x68656c6c6f", "world"]).unwrap();
        assert_eq!(payload, b"helloworld".to_vec());
    }

    #[test]
    fn latin1_token() {
        let payload = encode_tokens(&["caf\u{e9}"]).unwrap();
        assert_eq!(payload, vec![b'c', b'a', b'f', 0xe9]);
        assert!(matches!(
            encode_tokens(&["\u{20ac}"]),
            Err(EncodingError::NotLatin1 { c: '\u{20ac}' })
        ));
    }

    #[test]
    fn malformed_hex_token() {
        assert!(matches!(
            encode_tokens(&["0xZZ"]),
            Err(EncodingError::InvalidHexCharacter { c: 'Z', index: 0 })
        ));
        assert!(matches!(
            encode_tokens(&["0xabc"]),
            Err(EncodingError::OddLength)
        ));
    }
}
