//! Ed25519 keys and signatures for cairn.
//!
//! Peers are identified by the hash of their verifying key ([`PeerId`] in
//! `cairn-types`); signed DHT records carry a [`Signature`] verifiable
//! against the author's [`VerifyingKey`].

pub mod signer;

pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
