//! Policy-driven verifier for software supply-chain attestations
//! (in-toto/DSSE-style): decodes signed envelopes, builds a frozen claim
//! index, and checks it against a layout's artifact and attribute rules.
//!
//! No I/O and no async: every collaborator here operates on in-memory values
//! handed to it by a caller (the CLI, or a test). See [`verify::verify`] for
//! the orchestrator entry point.

pub mod artifact;
pub mod canonical;
pub mod claims;
pub mod envelope;
pub mod error;
pub mod expr;
pub mod keys;
pub mod layout;
pub mod predicate;
pub mod statement;
pub mod types;
pub mod verify;

pub use error::VerifyError;
pub use layout::{load_layout, Layout};
pub use predicate::Predicate;
pub use types::{Envelope, ResourceDescriptor, Signature, Statement};
pub use verify::{verify, verify_at};
