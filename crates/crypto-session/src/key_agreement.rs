//! Ephemeral P-256 key agreement

use std::fmt;
use std::str::FromStr;

use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, PublicKey, SecretKey, ecdh};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, PUBLIC_KEY_SIZE, SHARED_KEY_SIZE};

/// SEC1 tag of an uncompressed point
const UNCOMPRESSED_TAG: u8 = 0x04;

/// HKDF info string binding derived keys to this protocol
const HKDF_INFO: &[u8] = b"relaychat v1 aes-256-gcm";

/// Random scalars outside [1, n) are redrawn this many times before giving up
const MAX_SCALAR_ATTEMPTS: usize = 4;

/// Step applied to the ECDH x-coordinate to produce the AES key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyDerivation {
    /// Use the x-coordinate as-is, same as Web Crypto `deriveKey`
    #[default]
    Raw,
    /// HKDF-SHA-256 over the x-coordinate
    HkdfSha256,
}

impl fmt::Display for KeyDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::HkdfSha256 => f.write_str("hkdf"),
        }
    }
}

impl FromStr for KeyDerivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "hkdf" | "hkdf-sha256" => Ok(Self::HkdfSha256),
            other => Err(format!("unknown key derivation '{}' (expected raw or hkdf)", other)),
        }
    }
}

/// Key pair for ephemeral key exchange
///
/// The private scalar never leaves this type and is wiped on drop.
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new ephemeral key pair from the OS random source
    pub fn generate() -> CryptoResult<Self> {
        for _ in 0..MAX_SCALAR_ATTEMPTS {
            let mut bytes = Zeroizing::new([0u8; 32]);
            OsRng
                .try_fill_bytes(&mut bytes[..])
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

            if let Ok(secret) = SecretKey::from_bytes(FieldBytes::from_slice(&bytes[..])) {
                let public = secret.public_key();
                return Ok(Self { secret, public });
            }
        }

        Err(CryptoError::KeyGeneration(
            "random source produced no valid scalar".to_string(),
        ))
    }

    /// Raw uncompressed encoding of the public key
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let encoded = self.public.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Run ECDH against the peer's key and derive the symmetric key
    pub fn derive_shared(
        &self,
        peer: &PeerPublicKey,
        derivation: KeyDerivation,
    ) -> CryptoResult<SharedKey> {
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.0.as_affine());
        let x_coordinate = shared.raw_secret_bytes();

        let mut key = Zeroizing::new([0u8; SHARED_KEY_SIZE]);
        match derivation {
            KeyDerivation::Raw => key.copy_from_slice(x_coordinate.as_slice()),
            KeyDerivation::HkdfSha256 => Hkdf::<Sha256>::new(None, x_coordinate.as_slice())
                .expand(HKDF_INFO, &mut key[..])
                .map_err(|e| CryptoError::Derivation(e.to_string()))?,
        }

        Ok(SharedKey(key))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex(&self.public_key_bytes()[1..9]))
            .finish_non_exhaustive()
    }
}

/// Peer public key, validated as a point on P-256
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPublicKey(PublicKey);

impl PeerPublicKey {
    /// Import a raw uncompressed point received from the peer
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != UNCOMPRESSED_TAG {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "expected uncompressed point tag 0x04, got {:#04x}",
                bytes[0]
            )));
        }

        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKeyEncoding("point is not on P-256".to_string()))
    }
}

/// AES-256-GCM key shared by both peers
pub struct SharedKey(Zeroizing<[u8; SHARED_KEY_SIZE]>);

impl SharedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }

    /// Short digest of the key for logs; both peers see the same value
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_slice());
        hex(&digest[..8])
    }
}

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SharedKey {}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey({})", self.fingerprint())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
