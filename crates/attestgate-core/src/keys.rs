//! Key & signer registry (C2).
//!
//! Holds trusted public keys by ID and produces verifiers for the three
//! signature schemes functionaries may declare. Key IDs are derived the same
//! way regardless of scheme: SHA-256 of the canonical-JSON encoding of
//! `{keytype, scheme, keyid_hash_algorithms, keyval:{public}}`, hex-encoded
//! lowercase — see [`derive_key_id`].

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey as Ed25519VerifyingKey;
use p256::ecdsa::VerifyingKey as P256VerifyingKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use signature::Verifier as _;

use crate::canonical;
use crate::error::RegistryError;

/// The signature scheme family a [`Functionary`] declares.
///
/// `Unknown` preserves the declared (unrecognized) type string so a layout
/// naming a key type this verifier does not implement still parses — the
/// functionary is simply skipped at registry-build time (spec §4.2) rather
/// than failing the whole layout load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ecdsa,
    Ed25519,
    Unknown(String),
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(key_type_str(self))
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "rsa" => KeyType::Rsa,
            "ecdsa" => KeyType::Ecdsa,
            "ed25519" => KeyType::Ed25519,
            _ => KeyType::Unknown(raw),
        })
    }
}

/// A trusted signer record from the layout's `functionaries` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Functionary {
    /// Canonical key identifier; for entries loaded from the layout's
    /// `functionaries` map this is populated from the map key, since the
    /// wire format does not repeat it inside the value.
    #[serde(default)]
    pub key_id: String,
    pub key_type: KeyType,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub key_id_hash_algorithms: Vec<String>,
    pub public_key_material: String,
}

/// The canonical-JSON shape whose SHA-256 is the key ID.
#[derive(Serialize)]
struct KeyIdInput<'a> {
    keytype: &'a str,
    scheme: &'a str,
    keyid_hash_algorithms: &'a [String],
    keyval: KeyVal<'a>,
}

#[derive(Serialize)]
struct KeyVal<'a> {
    public: &'a str,
}

fn key_type_str(kt: &KeyType) -> &str {
    match kt {
        KeyType::Rsa => "rsa",
        KeyType::Ecdsa => "ecdsa",
        KeyType::Ed25519 => "ed25519",
        KeyType::Unknown(raw) => raw,
    }
}

/// Derive a functionary's canonical key ID from its declared fields.
///
/// Mandatory for functionaries that do not ship an explicit `keyId`.
pub fn derive_key_id(f: &Functionary) -> Result<String, RegistryError> {
    let input = KeyIdInput {
        keytype: key_type_str(&f.key_type),
        scheme: &f.scheme,
        keyid_hash_algorithms: &f.key_id_hash_algorithms,
        keyval: KeyVal {
            public: &f.public_key_material,
        },
    };
    let bytes = canonical::to_vec(&input).map_err(|e| RegistryError::MalformedKeyMaterial {
        key_id: f.key_id.clone(),
        reason: e.to_string(),
    })?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

/// A verifier bound to one functionary's public key material.
pub enum Verifier {
    Rsa(RsaPublicKey),
    Ecdsa(P256VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl Verifier {
    /// Cryptographically verify `signature` over `message`.
    ///
    /// Returns `false` on any mismatch; it never distinguishes "wrong key"
    /// from "wrong signature" — that distinction is not observable and
    /// callers (C3) only need a boolean.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Verifier::Rsa(key) => verify_rsa_pss(key, message, signature),
            Verifier::Ecdsa(key) => match p256::ecdsa::Signature::from_slice(signature) {
                Ok(sig) => key.verify(message, &sig).is_ok(),
                Err(_) => false,
            },
            Verifier::Ed25519(key) => match ed25519_dalek::Signature::from_slice(signature) {
                Ok(sig) => key.verify(message, &sig).is_ok(),
                Err(_) => false,
            },
        }
    }
}

fn verify_rsa_pss(key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    use rsa::pss::VerifyingKey;

    let verifying_key = VerifyingKey::<Sha256>::new(key.clone());
    match rsa::pss::Signature::try_from(signature) {
        Ok(sig) => verifying_key.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}

/// Holds trusted public keys by ID and hands out verifiers.
///
/// Unknown `keyType`s are skipped silently at build time:
/// the functionary is recorded as absent from the registry, which later
/// causes a downstream threshold failure rather than a build-time error.
pub struct Registry {
    keys: BTreeMap<String, Verifier>,
}

impl Registry {
    /// Build a registry from a layout's `functionaries` mapping.
    ///
    /// Functionaries whose key material fails to parse for their declared
    /// `keyType`, or whose declared `keyId` disagrees with the derived one,
    /// are recorded as skipped (see [`Registry::build`]'s returned skip
    /// list) rather than aborting the whole build.
    pub fn build(
        functionaries: &BTreeMap<String, Functionary>,
    ) -> Result<(Registry, Vec<RegistryError>), RegistryError> {
        let mut keys = BTreeMap::new();
        let mut skipped = Vec::new();

        for (declared_key_id, functionary) in functionaries {
            let mut functionary = functionary.clone();
            if functionary.key_id.is_empty() {
                functionary.key_id = declared_key_id.clone();
            }

            let derived = derive_key_id(&functionary)?;
            if !functionary.key_id.is_empty() && functionary.key_id != derived {
                skipped.push(RegistryError::KeyIdMismatch {
                    declared: functionary.key_id.clone(),
                    derived,
                });
                continue;
            }

            match build_verifier(&functionary) {
                Ok(verifier) => {
                    keys.insert(derived, verifier);
                }
                Err(e) => skipped.push(e),
            }
        }

        Ok((Registry { keys }, skipped))
    }

    pub fn get(&self, key_id: &str) -> Option<&Verifier> {
        self.keys.get(key_id)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Verifier)> {
        self.keys.iter()
    }
}

fn build_verifier(f: &Functionary) -> Result<Verifier, RegistryError> {
    if let KeyType::Unknown(raw) = &f.key_type {
        return Err(RegistryError::UnknownKeyType {
            key_id: f.key_id.clone(),
            key_type: raw.clone(),
        });
    }

    let der = decode_key_material(&f.public_key_material).map_err(|reason| {
        RegistryError::MalformedKeyMaterial {
            key_id: f.key_id.clone(),
            reason,
        }
    })?;

    match f.key_type {
        KeyType::Unknown(_) => unreachable!("handled above"),
        KeyType::Ed25519 => {
            let bytes: [u8; 32] =
                der.as_slice()
                    .try_into()
                    .map_err(|_| RegistryError::MalformedKeyMaterial {
                        key_id: f.key_id.clone(),
                        reason: "ed25519 public key must be 32 bytes".into(),
                    })?;
            let key = Ed25519VerifyingKey::from_bytes(&bytes).map_err(|e| {
                RegistryError::MalformedKeyMaterial {
                    key_id: f.key_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Verifier::Ed25519(key))
        }
        KeyType::Ecdsa => {
            let key = P256VerifyingKey::from_sec1_bytes(&der).map_err(|e| {
                RegistryError::MalformedKeyMaterial {
                    key_id: f.key_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Verifier::Ecdsa(key))
        }
        KeyType::Rsa => {
            use rsa::pkcs8::DecodePublicKey;
            let key = RsaPublicKey::from_public_key_der(&der).map_err(|e| {
                RegistryError::MalformedKeyMaterial {
                    key_id: f.key_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Verifier::Rsa(key))
        }
    }
}

/// Accepts PEM, hex, or base64 (standard or URL-safe) key material, since
/// layouts are human-authored and the exact encoding is not otherwise
/// constrained by the policy model.
fn decode_key_material(material: &str) -> Result<Vec<u8>, String> {
    let trimmed = material.trim();
    if trimmed.starts_with("-----BEGIN") {
        return decode_pem_body(trimmed);
    }
    if let Ok(bytes) = hex::decode(trimmed) {
        return Ok(bytes);
    }
    use base64::Engine;
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(trimmed) {
        return Ok(bytes);
    }
    base64::engine::general_purpose::URL_SAFE
        .decode(trimmed)
        .map_err(|e| format!("key material is neither PEM, hex, nor base64: {e}"))
}

/// Strip a PEM armor's header/footer lines and base64-decode the body.
/// Good enough for this verifier's needs (it only reads the DER payload,
/// never the header's algorithm label), so no dedicated PEM crate is pulled
/// in for it.
fn decode_pem_body(pem: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| format!("invalid PEM body: {e}"))
}
