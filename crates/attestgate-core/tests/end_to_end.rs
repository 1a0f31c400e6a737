//! Black-box end-to-end scenarios: each constructs a layout and a bag of
//! envelopes entirely in memory and calls the public `verify` entry point,
//! the same way a consumer embedding this crate would.

use std::collections::BTreeMap;

use attestgate_core::envelope::build_pae;
use attestgate_core::expr::EvaluationLimits;
use attestgate_core::keys::{Functionary, KeyType};
use attestgate_core::layout::{Constraint, ExpectedPredicate, Layout, Step};
use attestgate_core::types::IN_TOTO_PAYLOAD_TYPE;
use attestgate_core::{verify, Envelope, Signature};

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;

fn functionary(sk: &SigningKey) -> Functionary {
    let raw = sk.verifying_key().to_bytes();
    let mut f = Functionary {
        key_id: String::new(),
        key_type: KeyType::Ed25519,
        scheme: "ed25519".to_string(),
        key_id_hash_algorithms: vec!["sha256".to_string()],
        public_key_material: hex::encode(raw),
    };
    f.key_id = attestgate_core::keys::derive_key_id(&f).unwrap();
    f
}

fn envelope_for(sk: &SigningKey, key_id: &str, payload: &[u8]) -> Envelope {
    let message = build_pae(IN_TOTO_PAYLOAD_TYPE, payload);
    let sig = sk.sign(&message);
    Envelope {
        payload: base64::engine::general_purpose::STANDARD.encode(payload),
        payload_type: IN_TOTO_PAYLOAD_TYPE.to_string(),
        signatures: vec![Signature {
            keyid: Some(key_id.to_string()),
            sig: base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()),
        }],
    }
}

fn provenance_payload(build_type: &str, subject_name: &str, subject_digest: &str) -> Vec<u8> {
    json!({
        "_type": "https://in-toto.io/Statement/v1",
        "predicateType": "https://slsa.dev/provenance/v1",
        "subject": [{"name": subject_name, "digest": {"sha256": subject_digest}}],
        "predicate": {
            "buildDefinition": {
                "buildType": build_type,
                "resolvedDependencies": [],
            },
        },
    })
    .to_string()
    .into_bytes()
}

fn link_payload(materials: serde_json::Value, subject_name: &str, subject_digest: &str) -> Vec<u8> {
    json!({
        "_type": "https://in-toto.io/Statement/v1",
        "predicateType": "https://in-toto.io/Statement/v0.3/link",
        "subject": [{"name": subject_name, "digest": {"sha256": subject_digest}}],
        "predicate": {
            "command": [],
            "materials": materials,
        },
    })
    .to_string()
    .into_bytes()
}

fn single_step_layout(
    functionaries: Vec<Functionary>,
    threshold: u32,
    predicate_type: &str,
    expected_attributes: Vec<Constraint>,
    expected_materials: Vec<String>,
    expected_products: Vec<String>,
) -> Layout {
    let key_ids: Vec<String> = functionaries.iter().map(|f| f.key_id.clone()).collect();
    Layout {
        expires: "2999-01-01T00:00:00Z".to_string(),
        functionaries: functionaries.into_iter().map(|f| (f.key_id.clone(), f)).collect(),
        steps: vec![Step {
            name: "build".to_string(),
            command: None,
            expected_materials,
            expected_products,
            expected_predicates: vec![ExpectedPredicate {
                predicate_type: predicate_type.to_string(),
                expected_attributes,
                functionaries: key_ids,
                threshold,
            }],
        }],
        subjects: vec![],
        inspections: vec![],
    }
}

#[test]
fn s1_single_trusted_signer_passes() {
    let sk = SigningKey::from_bytes(&[1u8; 32]);
    let f = functionary(&sk);
    let key_id = f.key_id.clone();
    let layout = single_step_layout(
        vec![f],
        1,
        "https://slsa.dev/provenance/v1",
        vec![],
        vec![],
        vec![],
    );

    let payload = provenance_payload("https://example/build/v1", "out.bin", "abc123");
    let env = envelope_for(&sk, &key_id, &payload);
    let attestations = BTreeMap::from([("build.json".to_string(), env)]);

    let result = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default());
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn s2_untrusted_signer_fails() {
    let trusted_sk = SigningKey::from_bytes(&[2u8; 32]);
    let untrusted_sk = SigningKey::from_bytes(&[20u8; 32]);
    let trusted = functionary(&trusted_sk);
    let key_id = trusted.key_id.clone();
    let layout = single_step_layout(
        vec![trusted],
        1,
        "https://slsa.dev/provenance/v1",
        vec![],
        vec![],
        vec![],
    );

    let payload = provenance_payload("https://example/build/v1", "out.bin", "abc123");
    let untrusted_id = functionary(&untrusted_sk).key_id;
    let env = envelope_for(&untrusted_sk, &untrusted_id, &payload);
    let attestations = BTreeMap::from([("build.json".to_string(), env)]);

    let err = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default())
        .expect_err("untrusted signer must not pass");
    // The untrusted envelope is authenticated by no trusted verifier, so it
    // contributes nothing to the index: the step ends up with no claims at
    // all.
    assert_eq!(err.error_code(), "NoClaimsForStep");
    let _ = key_id;
}

#[test]
fn s3_attribute_rule_passes() {
    let sk = SigningKey::from_bytes(&[3u8; 32]);
    let f = functionary(&sk);
    let key_id = f.key_id.clone();
    let constraint = Constraint {
        rule_text: "predicate.buildDefinition.buildType == \"https://example/build/v1\"".to_string(),
        allow_if_no_claim: false,
        warn: false,
        debug: String::new(),
    };
    let layout = single_step_layout(
        vec![f],
        1,
        "https://slsa.dev/provenance/v1",
        vec![constraint],
        vec![],
        vec![],
    );

    let payload = provenance_payload("https://example/build/v1", "out.bin", "abc123");
    let env = envelope_for(&sk, &key_id, &payload);
    let attestations = BTreeMap::from([("build.json".to_string(), env)]);

    let result = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default());
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn s4_attribute_rule_fails() {
    let sk = SigningKey::from_bytes(&[4u8; 32]);
    let f = functionary(&sk);
    let key_id = f.key_id.clone();
    let constraint = Constraint {
        rule_text: "predicate.buildDefinition.buildType == \"https://example/build/v1\"".to_string(),
        allow_if_no_claim: false,
        warn: false,
        debug: String::new(),
    };
    let layout = single_step_layout(
        vec![f],
        1,
        "https://slsa.dev/provenance/v1",
        vec![constraint],
        vec![],
        vec![],
    );

    let payload = provenance_payload("evil", "out.bin", "abc123");
    let env = envelope_for(&sk, &key_id, &payload);
    let attestations = BTreeMap::from([("build.json".to_string(), env)]);

    let err = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default())
        .expect_err("mismatched buildType must fail");
    assert_eq!(err.error_code(), "RuleFailed");
}

#[test]
fn s5_expired_layout_fails_before_anything_else() {
    let sk = SigningKey::from_bytes(&[5u8; 32]);
    let f = functionary(&sk);
    let key_id = f.key_id.clone();
    let mut layout = single_step_layout(
        vec![f],
        1,
        "https://slsa.dev/provenance/v1",
        vec![],
        vec![],
        vec![],
    );
    layout.expires = "2000-01-01T00:00:00Z".to_string();

    let payload = provenance_payload("https://example/build/v1", "out.bin", "abc123");
    let env = envelope_for(&sk, &key_id, &payload);
    let attestations = BTreeMap::from([("build.json".to_string(), env)]);

    let err = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default())
        .expect_err("an expired layout must never pass");
    assert_eq!(err.error_code(), "LayoutExpired");
}

#[test]
fn s6_cross_step_material_match_passes() {
    let src_sk = SigningKey::from_bytes(&[6u8; 32]);
    let build_sk = SigningKey::from_bytes(&[7u8; 32]);
    let src_f = functionary(&src_sk);
    let build_f = functionary(&build_sk);
    let src_key_id = src_f.key_id.clone();
    let build_key_id = build_f.key_id.clone();

    let layout = Layout {
        expires: "2999-01-01T00:00:00Z".to_string(),
        functionaries: BTreeMap::from([
            (src_key_id.clone(), src_f),
            (build_key_id.clone(), build_f),
        ]),
        steps: vec![
            Step {
                name: "src".to_string(),
                command: None,
                expected_materials: vec![],
                expected_products: vec![],
                expected_predicates: vec![ExpectedPredicate {
                    predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
                    expected_attributes: vec![],
                    functionaries: vec![src_key_id.clone()],
                    threshold: 1,
                }],
            },
            Step {
                name: "build".to_string(),
                command: None,
                expected_materials: vec!["MATCH * WITH PRODUCTS FROM src".to_string()],
                expected_products: vec![],
                expected_predicates: vec![ExpectedPredicate {
                    predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
                    expected_attributes: vec![],
                    functionaries: vec![build_key_id.clone()],
                    threshold: 1,
                }],
            },
        ],
        subjects: vec![],
        inspections: vec![],
    };

    let src_payload = link_payload(json!([]), "app.tar.gz", "digest-match");
    let src_env = envelope_for(&src_sk, &src_key_id, &src_payload);

    let build_payload = link_payload(
        json!([{"name": "app.tar.gz", "digest": {"sha256": "digest-match"}}]),
        "out.bin",
        "whatever",
    );
    let build_env = envelope_for(&build_sk, &build_key_id, &build_payload);

    let attestations = BTreeMap::from([
        ("src.json".to_string(), src_env),
        ("build.json".to_string(), build_env),
    ]);

    let result = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default());
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn s7_cross_step_material_mismatch_fails() {
    let src_sk = SigningKey::from_bytes(&[8u8; 32]);
    let build_sk = SigningKey::from_bytes(&[9u8; 32]);
    let src_f = functionary(&src_sk);
    let build_f = functionary(&build_sk);
    let src_key_id = src_f.key_id.clone();
    let build_key_id = build_f.key_id.clone();

    let layout = Layout {
        expires: "2999-01-01T00:00:00Z".to_string(),
        functionaries: BTreeMap::from([
            (src_key_id.clone(), src_f),
            (build_key_id.clone(), build_f),
        ]),
        steps: vec![
            Step {
                name: "src".to_string(),
                command: None,
                expected_materials: vec![],
                expected_products: vec![],
                expected_predicates: vec![ExpectedPredicate {
                    predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
                    expected_attributes: vec![],
                    functionaries: vec![src_key_id.clone()],
                    threshold: 1,
                }],
            },
            Step {
                name: "build".to_string(),
                command: None,
                expected_materials: vec!["MATCH * WITH PRODUCTS FROM src".to_string()],
                expected_products: vec![],
                expected_predicates: vec![ExpectedPredicate {
                    predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
                    expected_attributes: vec![],
                    functionaries: vec![build_key_id.clone()],
                    threshold: 1,
                }],
            },
        ],
        subjects: vec![],
        inspections: vec![],
    };

    let src_payload = link_payload(json!([]), "app.tar.gz", "digest-original");
    let src_env = envelope_for(&src_sk, &src_key_id, &src_payload);

    // The build step's material digest disagrees with src's product digest.
    let build_payload = link_payload(
        json!([{"name": "app.tar.gz", "digest": {"sha256": "digest-tampered"}}]),
        "out.bin",
        "whatever",
    );
    let build_env = envelope_for(&build_sk, &build_key_id, &build_payload);

    let attestations = BTreeMap::from([
        ("src.json".to_string(), src_env),
        ("build.json".to_string(), build_env),
    ]);

    let err = verify(layout, &attestations, &BTreeMap::new(), &EvaluationLimits::default())
        .expect_err("tampered material digest must fail");
    assert_eq!(err.error_code(), "ArtifactRuleViolation");
}
