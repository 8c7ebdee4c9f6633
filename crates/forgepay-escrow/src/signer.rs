//! Local transaction signing.
//!
//! The escrow service hands back unsigned ledger envelopes; the key holder
//! signs them here and nothing secret ever leaves the process. Only version-1
//! envelopes with an empty signature list are accepted.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use forgepay_core::AccountId;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::gateway::{SignedTransaction, UnsignedTransaction};

pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const PUBLIC_NETWORK_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";

/// Envelope discriminant for a v1 transaction, also mixed into the signature payload.
const ENVELOPE_TYPE_TX: [u8; 4] = [0, 0, 0, 2];

#[derive(Debug, Error, PartialEq)]
pub enum SignError {
    #[error("secret key is not a valid strkey seed")]
    InvalidSecret,
    #[error("transaction is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("unsupported envelope type {0:?}")]
    UnsupportedEnvelope([u8; 4]),
    #[error("envelope already carries {0} signature(s)")]
    AlreadySigned(u32),
    #[error("envelope is truncated")]
    Truncated,
}

/// Something holding a ledger key.
pub trait TransactionSigner: Send + Sync {
    fn public_key(&self) -> AccountId;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignError>;
}

/// An ed25519 keypair bound to one network passphrase.
pub struct KeypairSigner {
    key: SigningKey,
    network_id: [u8; 32],
}

impl KeypairSigner {
    /// Load from an `S...` strkey seed.
    pub fn from_secret(secret: &str, network_passphrase: &str) -> Result<Self, SignError> {
        let seed = stellar_strkey::ed25519::PrivateKey::from_string(secret.trim())
            .map_err(|_| SignError::InvalidSecret)?;
        Ok(Self::from_seed(seed.0, network_passphrase))
    }

    pub fn from_seed(seed: [u8; 32], network_passphrase: &str) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
            network_id: Sha256::digest(network_passphrase.as_bytes()).into(),
        }
    }

    fn hint(&self) -> [u8; 4] {
        let public = self.key.verifying_key().to_bytes();
        [public[28], public[29], public[30], public[31]]
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("public_key", &self.public_key().as_str())
            .finish_non_exhaustive()
    }
}

impl TransactionSigner for KeypairSigner {
    fn public_key(&self) -> AccountId {
        AccountId::from_public_key(self.key.verifying_key().to_bytes())
    }

    /// Signs a v1 transaction envelope that carries no signatures yet.
    ///
    /// The envelope is not decoded as XDR. It must be the 4-byte envelope
    /// type, the transaction body, then an empty signature list, so its last
    /// four bytes are a zero signature count. An envelope with signatures has
    /// a non-zero count there and is refused; one whose trailing bytes are
    /// not a signature count at all cannot be told apart and is signed as is.
    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignError> {
        let envelope = BASE64.decode(tx.xdr.trim())?;
        if envelope.len() < 8 {
            return Err(SignError::Truncated);
        }
        let (kind, rest) = envelope.split_at(4);
        if kind != ENVELOPE_TYPE_TX {
            return Err(SignError::UnsupportedEnvelope([kind[0], kind[1], kind[2], kind[3]]));
        }
        let (body, count) = rest.split_at(rest.len() - 4);
        let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]);
        if count != 0 {
            return Err(SignError::AlreadySigned(count));
        }

        let mut payload = Vec::with_capacity(36 + body.len());
        payload.extend_from_slice(&self.network_id);
        payload.extend_from_slice(&ENVELOPE_TYPE_TX);
        payload.extend_from_slice(body);
        let hash = Sha256::digest(&payload);
        let signature = self.key.sign(hash.as_slice());

        // body, then a one-element signature list: hint + length-prefixed bytes
        let mut signed = Vec::with_capacity(envelope.len() + 4 + 4 + 64);
        signed.extend_from_slice(&ENVELOPE_TYPE_TX);
        signed.extend_from_slice(body);
        signed.extend_from_slice(&1u32.to_be_bytes());
        signed.extend_from_slice(&self.hint());
        signed.extend_from_slice(&64u32.to_be_bytes());
        signed.extend_from_slice(&signature.to_bytes());

        Ok(SignedTransaction {
            xdr: BASE64.encode(signed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    const SECRET: &str = "SAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQC5MY";
    const PUBLIC: &str = "GCFIRY65OQE7DFP5KLNS2PF2LVZMUZYJX4OZIEQ36N2IQANUB5XVYOJR";

    fn unsigned(body: &[u8]) -> UnsignedTransaction {
        let mut bytes = ENVELOPE_TYPE_TX.to_vec();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        UnsignedTransaction {
            xdr: BASE64.encode(bytes),
        }
    }

    #[test]
    fn secret_derives_expected_account() {
        let signer = KeypairSigner::from_secret(SECRET, TESTNET_PASSPHRASE).unwrap();
        assert_eq!(signer.public_key().as_str(), PUBLIC);
        let from_seed = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        assert_eq!(from_seed.public_key(), signer.public_key());
    }

    #[test]
    fn invalid_secret_rejected() {
        assert_eq!(
            KeypairSigner::from_secret(PUBLIC, TESTNET_PASSPHRASE).unwrap_err(),
            SignError::InvalidSecret
        );
    }

    #[test]
    fn debug_does_not_leak_the_seed() {
        let signer = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        let shown = format!("{signer:?}");
        assert!(shown.contains(PUBLIC));
        assert!(!shown.contains(SECRET));
    }

    #[test]
    fn signature_verifies_over_network_payload() {
        let signer = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        let body = b"transaction-body-bytes";
        let signed = signer.sign(&unsigned(body)).unwrap();
        let bytes = BASE64.decode(&signed.xdr).unwrap();

        assert_eq!(&bytes[..4], &ENVELOPE_TYPE_TX);
        assert_eq!(&bytes[4..4 + body.len()], body);
        let tail = &bytes[4 + body.len()..];
        assert_eq!(tail.len(), 4 + 4 + 4 + 64);
        assert_eq!(&tail[..4], &1u32.to_be_bytes());
        assert_eq!(&tail[4..8], &signer.hint());
        assert_eq!(&tail[8..12], &64u32.to_be_bytes());

        let mut payload = Sha256::digest(TESTNET_PASSPHRASE.as_bytes()).to_vec();
        payload.extend_from_slice(&ENVELOPE_TYPE_TX);
        payload.extend_from_slice(body);
        let hash = Sha256::digest(&payload);
        let sig_bytes: [u8; 64] = tail[12..].try_into().unwrap();
        signer
            .key
            .verifying_key()
            .verify(hash.as_slice(), &Signature::from_bytes(&sig_bytes))
            .unwrap();
    }

    #[test]
    fn network_changes_signature() {
        let body = b"same-body";
        let test = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE)
            .sign(&unsigned(body))
            .unwrap();
        let public = KeypairSigner::from_seed([1u8; 32], PUBLIC_NETWORK_PASSPHRASE)
            .sign(&unsigned(body))
            .unwrap();
        assert_ne!(test, public);
    }

    #[test]
    fn signed_envelope_cannot_be_signed_again() {
        let signer = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        let signed = signer.sign(&unsigned(b"body")).unwrap();
        let again = UnsignedTransaction { xdr: signed.xdr };
        assert_eq!(signer.sign(&again).unwrap_err(), SignError::AlreadySigned(1));
    }

    #[test]
    fn malformed_envelopes_rejected() {
        let signer = KeypairSigner::from_seed([1u8; 32], TESTNET_PASSPHRASE);
        let short = UnsignedTransaction {
            xdr: BASE64.encode([0u8, 0, 0, 2]),
        };
        assert_eq!(signer.sign(&short).unwrap_err(), SignError::Truncated);

        let legacy = UnsignedTransaction {
            xdr: BASE64.encode([0u8, 0, 0, 0, 1, 2, 3, 4, 0, 0, 0, 0]),
        };
        assert_eq!(
            signer.sign(&legacy).unwrap_err(),
            SignError::UnsupportedEnvelope([0, 0, 0, 0])
        );

        let garbage = UnsignedTransaction {
            xdr: "not base64!".into(),
        };
        assert!(matches!(
            signer.sign(&garbage).unwrap_err(),
            SignError::Encoding(_)
        ));
    }
}
