//! Envelope verifier (C3): DSSE authentication against a verifier set with
//! a signer threshold.
//!
//! The per-signature walk / dedupe-by-identity / threshold algorithm is a
//! single pass that borrows candidate verifiers mutably, rather than the
//! exception-on-every-step style a naive port would produce.

use std::collections::BTreeSet;

use base64::Engine;
use tracing::{debug, warn};

use crate::error::EnvelopeError;
use crate::keys::Registry;
use crate::types::Envelope;

/// The set of signer identities (`keyId`s) accepted for one envelope.
pub type Accepted = BTreeSet<String>;

/// Build the DSSE Pre-Authentication Encoding:
/// `"DSSEv1" SP len(payloadType) SP payloadType SP len(payload) SP payload`.
///
/// Prefix-free for any two distinct `(payloadType, payload)` pairs because
/// each variable-length field is preceded by its own decimal byte length.
pub fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    out.extend_from_slice(b"DSSEv1");
    out.push(b' ');
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// Decode base64, tolerating both the standard and URL-safe alphabets,
/// with and without padding.
pub fn decode_base64(s: &str) -> Result<Vec<u8>, EnvelopeError> {
    let s = s.trim();
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(s))
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(s))
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s))
        .map_err(|e| EnvelopeError::MalformedEnvelope {
            reason: format!("signature is not valid base64: {e}"),
        })
}

/// Verify `envelope` against `registry` with signer threshold `t`.
///
/// Returns the set of accepted, deduplicated signer identities, or an error:
/// 1. empty `signatures` ⇒ `NoSignature`,
/// 2. the signed message is the PAE of `(payloadType, decoded-payload)`,
/// 3. each signature is tried against the verifiers not yet claimed by an
///    earlier signature in this envelope; a verifier is skipped if both its
///    key ID and the signature's declared `keyid` are non-empty and differ,
/// 4. acceptances are deduped by key ID,
/// 5. the unique-identity count must reach `t`.
pub fn verify_envelope(
    envelope: &Envelope,
    registry: &Registry,
    threshold: usize,
) -> Result<Accepted, EnvelopeError> {
    if envelope.signatures.is_empty() {
        return Err(EnvelopeError::NoSignature);
    }

    let payload = decode_base64(&envelope.payload)?;
    let message = build_pae(&envelope.payload_type, &payload);

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    let mut accepted: Accepted = BTreeSet::new();

    for sig in &envelope.signatures {
        let sig_bytes = match decode_base64(&sig.sig) {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "skipping signature with undecodable body");
                continue;
            }
        };

        let mut matched_key_id = None;
        for (key_id, verifier) in registry.iter() {
            if claimed.contains(key_id) {
                continue;
            }
            if let Some(declared) = &sig.keyid {
                if !declared.is_empty() && !key_id.is_empty() && declared != key_id {
                    continue;
                }
            }
            if verifier.verify(&message, &sig_bytes) {
                matched_key_id = Some(key_id.clone());
                break;
            }
        }

        match matched_key_id {
            Some(key_id) => {
                if accepted.contains(&key_id) {
                    debug!(%key_id, "signature accepted by an already-used identity, not double-counted");
                } else {
                    accepted.insert(key_id.clone());
                }
                claimed.insert(key_id);
            }
            None => {
                debug!("signature accepted by no known verifier, ignored");
            }
        }
    }

    if accepted.len() < threshold {
        warn!(accepted = accepted.len(), threshold, "envelope threshold not met");
        return Err(EnvelopeError::ThresholdNotMet {
            accepted: accepted.len(),
            threshold,
        });
    }

    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Functionary, KeyType};
    use base64::Engine;
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::BTreeMap;

    fn make_registry(signing_keys: &[&SigningKey]) -> (Registry, Vec<String>) {
        let mut functionaries = BTreeMap::new();
        for sk in signing_keys {
            let raw = sk.verifying_key().to_bytes();
            let mut f = Functionary {
                key_id: String::new(),
                key_type: KeyType::Ed25519,
                scheme: "ed25519".into(),
                key_id_hash_algorithms: vec!["sha256".into()],
                public_key_material: hex::encode(raw),
            };
            f.key_id = crate::keys::derive_key_id(&f).unwrap();
            functionaries.insert(f.key_id.clone(), f);
        }
        let key_ids: Vec<String> = functionaries.keys().cloned().collect();
        let (registry, skipped) = Registry::build(&functionaries).unwrap();
        assert!(skipped.is_empty());
        (registry, key_ids)
    }

    fn sign_envelope(signing_key: &SigningKey, payload: &[u8], keyid: Option<String>) -> Envelope {
        let message = build_pae(crate::types::IN_TOTO_PAYLOAD_TYPE, payload);
        let sig = signing_key.sign(&message);
        Envelope {
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            payload_type: crate::types::IN_TOTO_PAYLOAD_TYPE.to_string(),
            signatures: vec![crate::types::Signature {
                keyid,
                sig: base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
            }],
        }
    }

    #[test]
    fn accepts_single_valid_signature_at_threshold_one() {
        let sk = SigningKey::from_bytes(&[11u8; 32]);
        let (registry, key_ids) = make_registry(&[&sk]);
        let env = sign_envelope(&sk, b"{\"hello\":true}", Some(key_ids[0].clone()));
        let accepted = verify_envelope(&env, &registry, 1).unwrap();
        assert_eq!(accepted, BTreeSet::from([key_ids[0].clone()]));
    }

    #[test]
    fn empty_signatures_is_no_signature() {
        let sk = SigningKey::from_bytes(&[12u8; 32]);
        let (registry, _) = make_registry(&[&sk]);
        let env = Envelope {
            payload: base64::engine::general_purpose::STANDARD.encode(b"{}"),
            payload_type: crate::types::IN_TOTO_PAYLOAD_TYPE.to_string(),
            signatures: vec![],
        };
        let err = verify_envelope(&env, &registry, 1).unwrap_err();
        assert!(matches!(err, EnvelopeError::NoSignature));
    }

    #[test]
    fn untrusted_signer_yields_threshold_not_met() {
        let trusted = SigningKey::from_bytes(&[13u8; 32]);
        let untrusted = SigningKey::from_bytes(&[14u8; 32]);
        let (registry, _) = make_registry(&[&trusted]);
        let env = sign_envelope(&untrusted, b"{}", None);
        let err = verify_envelope(&env, &registry, 1).unwrap_err();
        assert!(matches!(err, EnvelopeError::ThresholdNotMet { accepted: 0, threshold: 1 }));
    }

    #[test]
    fn keyid_mismatch_skips_verifier_even_if_it_would_validate() {
        let sk = SigningKey::from_bytes(&[15u8; 32]);
        let (registry, key_ids) = make_registry(&[&sk]);
        let env = sign_envelope(&sk, b"{}", Some("not-the-real-key-id".to_string()));
        let err = verify_envelope(&env, &registry, 1).unwrap_err();
        assert!(matches!(err, EnvelopeError::ThresholdNotMet { .. }));
        let _ = key_ids;
    }

    #[test]
    fn duplicate_signatures_from_same_identity_do_not_double_count_toward_threshold() {
        let sk = SigningKey::from_bytes(&[16u8; 32]);
        let (registry, key_ids) = make_registry(&[&sk]);
        let payload = b"{}";
        let message = build_pae(crate::types::IN_TOTO_PAYLOAD_TYPE, payload);
        let sig = sk.sign(&message);
        let env = Envelope {
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            payload_type: crate::types::IN_TOTO_PAYLOAD_TYPE.to_string(),
            signatures: vec![
                crate::types::Signature {
                    keyid: Some(key_ids[0].clone()),
                    sig: base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
                },
                crate::types::Signature {
                    keyid: Some(key_ids[0].clone()),
                    sig: base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
                },
            ],
        };
        let accepted = verify_envelope(&env, &registry, 2);
        assert!(accepted.is_err());
    }

    #[test]
    fn threshold_two_requires_two_distinct_identities() {
        let sk1 = SigningKey::from_bytes(&[17u8; 32]);
        let sk2 = SigningKey::from_bytes(&[18u8; 32]);
        let (registry, key_ids) = make_registry(&[&sk1, &sk2]);
        let payload = b"{}";
        let message = build_pae(crate::types::IN_TOTO_PAYLOAD_TYPE, payload);
        let sig1 = sk1.sign(&message);
        let sig2 = sk2.sign(&message);
        let env = Envelope {
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            payload_type: crate::types::IN_TOTO_PAYLOAD_TYPE.to_string(),
            signatures: vec![
                crate::types::Signature {
                    keyid: None,
                    sig: base64::engine::general_purpose::STANDARD.encode(sig1.to_bytes()),
                },
                crate::types::Signature {
                    keyid: None,
                    sig: base64::engine::general_purpose::STANDARD.encode(sig2.to_bytes()),
                },
            ],
        };
        let accepted = verify_envelope(&env, &registry, 2).unwrap();
        assert_eq!(accepted.len(), 2);
        assert!(key_ids.iter().all(|k| accepted.contains(k)));
    }

    #[test]
    fn pae_is_prefix_free() {
        let a = build_pae("type/a", b"short");
        let b = build_pae("type/ab", b"hort");
        assert_ne!(a, b, "different (payloadType, payload) pairs must encode differently");
    }

    #[test]
    fn url_safe_base64_decodes() {
        let encoded = base64::engine::general_purpose::URL_SAFE.encode(b"abc123!?");
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, b"abc123!?");
    }
}
