//! Vendor credential codec.
//!
//! Both schemes interoperate with pre-existing vendor credential stores and
//! use fixed, vendor-published DES keys. They are obfuscation formats, not a
//! security boundary; the agent never decrypts a stored PIN.

use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

use crate::error::{AgentResult, CredentialError};

type DesCbcEnc = cbc::Encryptor<Des>;

/// Scheme A key: registry-stored binary password (TightVNC format).
const REGISTRY_SCHEME_KEY: [u8; 8] = [0xe8, 0x4a, 0xd6, 0x60, 0xc4, 0x67, 0x2c, 0x29];

/// Scheme B key: file-stored hex password (x11vnc passwd format).
const FILE_SCHEME_KEY: [u8; 8] = [0x17, 0x52, 0x6b, 0x06, 0x23, 0x4e, 0x58, 0x07];

const PIN_CHARSET: &[u8] = b"0123456789";
const GENERATED_PIN_LEN: usize = 8;

/// Zero-pad the PIN to one DES block. Input beyond 8 bytes is silently
/// truncated: the vendor stores exactly one block, and longer passwords
/// already behave this way in the vendor's own tooling.
fn pin_block(pin: &str) -> [u8; 8] {
    let mut block = [0u8; 8];
    let bytes = pin.as_bytes();
    let len = bytes.len().min(8);
    block[..len].copy_from_slice(&bytes[..len]);
    block
}

/// Scheme A: DES-CBC with a zero IV over the single padded block, producing
/// the 8-byte binary value written to the backend's registry store.
pub fn encode_registry(pin: &str) -> AgentResult<[u8; 8]> {
    let mut block = pin_block(pin);
    let enc = DesCbcEnc::new(&REGISTRY_SCHEME_KEY.into(), &[0u8; 8].into());
    enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut block, 8)
        .map_err(|_| CredentialError::Encoding)?;
    Ok(block)
}

/// Scheme B: DES-ECB single-block encrypt, ciphertext plus one trailing zero
/// byte, hex-encoded. Yields an 18-character string ending in `00`, the
/// layout the backend's password file parser expects.
pub fn encode_file_hex(pin: &str) -> AgentResult<String> {
    let cipher = Des::new(&FILE_SCHEME_KEY.into());
    let mut block = GenericArray::from(pin_block(pin));
    cipher.encrypt_block(&mut block);

    let mut out = block.to_vec();
    out.push(0u8);
    Ok(hex::encode(out))
}

/// Fresh random numeric PIN for revocation-by-replacement on stop. The value
/// is never shown to anyone; it only has to differ from the previous PIN
/// with overwhelming probability.
pub fn generate_replacement_pin() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PIN_LEN)
        .map(|_| PIN_CHARSET[rng.gen_range(0..PIN_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_encoding_is_deterministic() {
        let a = encode_registry("483920").unwrap();
        let b = encode_registry("483920").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, encode_registry("000000").unwrap());
    }

    #[test]
    fn registry_encoding_truncates_beyond_eight_bytes() {
        // Vendor constraint: only the first 8 bytes participate.
        let short = encode_registry("12345678").unwrap();
        let long = encode_registry("123456789abc").unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn file_encoding_shape() {
        let encoded = encode_file_hex("483920").unwrap();
        assert_eq!(encoded.len(), 18);
        assert!(encoded.ends_with("00"));
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn file_encoding_differs_between_pins() {
        assert_ne!(
            encode_file_hex("483920").unwrap(),
            encode_file_hex("120653").unwrap()
        );
    }

    #[test]
    fn schemes_use_distinct_keys() {
        // The two vendor stores must not accept each other's blobs.
        let registry = encode_registry("483920").unwrap();
        let file = encode_file_hex("483920").unwrap();
        assert_ne!(hex::encode(registry), file[..16]);
    }

    #[test]
    fn replacement_pins_are_fresh() {
        let a = generate_replacement_pin();
        let b = generate_replacement_pin();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
    }
}
