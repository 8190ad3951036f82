//! Ed25519-signed transactions for callers that submit over an untrusted
//! channel. The signed digest doubles as the engine receipt id, so a signed
//! envelope can be applied at most once.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::{receipt_id, Engine, Transaction};
use crate::error::LedgerError;
use crate::events::LedgerEvent;
use crate::ledger::{AccountId, Timestamp};
use crate::yield_pool::Custody;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub caller: AccountId,
    pub nonce: u64,
    pub tx: Transaction,
    #[serde(with = "crate::submit::serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn sign(key: &SigningKey, caller: impl Into<AccountId>, nonce: u64, tx: Transaction) -> Self {
        let caller = caller.into();
        let digest = receipt_id(&caller, &tx, nonce);
        Self {
            caller,
            nonce,
            tx,
            signature: key.sign(&digest).to_bytes().to_vec(),
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        receipt_id(&self.caller, &self.tx, self.nonce)
    }

    /// Compact transport form: base64 of the JSON envelope.
    pub fn to_base64(&self) -> Result<String, SubmitError> {
        let json = serde_json::to_vec(self).map_err(|e| SubmitError::Encoding(e.to_string()))?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, SubmitError> {
        let json = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SubmitError::Encoding(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| SubmitError::Encoding(e.to_string()))
    }
}

/// Verifying keys of the accounts allowed to submit signed transactions.
#[derive(Clone, Debug, Default)]
pub struct KeyRegistry {
    keys: BTreeMap<AccountId, VerifyingKey>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, account: impl Into<AccountId>, key: VerifyingKey) {
        self.keys.insert(account.into(), key);
    }

    /// Build from an `account -> hex public key` map, as stored on disk.
    pub fn from_hex_map(entries: &BTreeMap<AccountId, String>) -> Result<Self, VerificationError> {
        let mut registry = Self::new();
        for (account, pk_hex) in entries {
            let bytes = hex::decode(pk_hex.trim())
                .map_err(|_| VerificationError::MalformedKey(account.clone()))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| VerificationError::MalformedKey(account.clone()))?;
            let key = VerifyingKey::from_bytes(&bytes)
                .map_err(|_| VerificationError::MalformedKey(account.clone()))?;
            registry.register(account.clone(), key);
        }
        Ok(registry)
    }

    pub fn verify(&self, signed: &SignedTransaction) -> Result<(), VerificationError> {
        let key = self
            .keys
            .get(&signed.caller)
            .ok_or_else(|| VerificationError::UnknownSigner(signed.caller.clone()))?;
        let signature = Signature::from_slice(&signed.signature)
            .map_err(|_| VerificationError::MalformedSignature(signed.caller.clone()))?;
        key.verify_strict(&signed.digest(), &signature)
            .map_err(|_| VerificationError::InvalidSignature(signed.caller.clone()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("no verifying key registered for {0}")]
    UnknownSigner(AccountId),
    #[error("malformed verifying key for {0}")]
    MalformedKey(AccountId),
    #[error("malformed signature from {0}")]
    MalformedSignature(AccountId),
    #[error("invalid signature from {0}")]
    InvalidSignature(AccountId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("malformed envelope: {0}")]
    Encoding(String),
}

/// Verify `signed` against `registry` and apply it to `engine`.
pub fn submit_signed<C: Custody>(
    engine: &mut Engine<C>,
    registry: &KeyRegistry,
    signed: SignedTransaction,
    now: Timestamp,
) -> Result<Vec<LedgerEvent>, SubmitError> {
    registry.verify(&signed)?;
    let receipt = signed.digest();
    let events = engine.submit(&signed.caller, signed.tx, receipt, now)?;
    info!(caller = %signed.caller, nonce = signed.nonce, "signed transaction applied");
    Ok(events)
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::EngineConfig;
    use crate::yield_pool::InMemoryCustody;
    use rand::rngs::OsRng;

    fn setup() -> (Engine, KeyRegistry, SigningKey) {
        let sk = SigningKey::generate(&mut OsRng);
        let mut registry = KeyRegistry::new();
        registry.register("admin", sk.verifying_key());
        let engine = Engine::new(&EngineConfig::new("admin", 500), InMemoryCustody::new());
        (engine, registry, sk)
    }

    fn mint_tx() -> Transaction {
        Transaction::Mint {
            account: "user1".into(),
            amount: 10,
            attestation: "registry-cert-42".into(),
        }
    }

    #[test]
    fn signed_mint_is_applied_once() {
        let (mut engine, registry, sk) = setup();
        let signed = SignedTransaction::sign(&sk, "admin", 1, mint_tx());
        submit_signed(&mut engine, &registry, signed.clone(), 10).unwrap();
        assert_eq!(engine.balance_of("user1"), 10);

        let err = submit_signed(&mut engine, &registry, signed, 11).unwrap_err();
        assert_eq!(err, SubmitError::Ledger(LedgerError::DuplicateReceipt));
        assert_eq!(engine.balance_of("user1"), 10);
    }

    #[test]
    fn signed_nonce_matching_local_height_is_accepted() {
        let (mut engine, registry, sk) = setup();
        engine.execute("admin", mint_tx(), 10).unwrap();
        assert_eq!(engine.meta().height, 1);

        let signed = SignedTransaction::sign(&sk, "admin", 0, mint_tx());
        submit_signed(&mut engine, &registry, signed, 11).unwrap();
        assert_eq!(engine.balance_of("user1"), 20);

        let signed = SignedTransaction::sign(&sk, "admin", 3, mint_tx());
        submit_signed(&mut engine, &registry, signed, 12).unwrap();
        assert_eq!(engine.meta().height, 3);
        engine.execute("admin", mint_tx(), 13).unwrap();
        assert_eq!(engine.balance_of("user1"), 40);
    }

    #[test]
    fn tampered_envelope_fails_verification() {
        let (mut engine, registry, sk) = setup();
        let mut signed = SignedTransaction::sign(&sk, "admin", 1, mint_tx());
        signed.tx = Transaction::Mint {
            account: "mallory".into(),
            amount: 10_000,
            attestation: "registry-cert-42".into(),
        };
        let err = submit_signed(&mut engine, &registry, signed, 10).unwrap_err();
        assert_eq!(
            err,
            SubmitError::Verification(VerificationError::InvalidSignature("admin".into()))
        );
        assert_eq!(engine.total_supply(), 0);
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let (mut engine, registry, _) = setup();
        let stranger = SigningKey::generate(&mut OsRng);
        let signed = SignedTransaction::sign(&stranger, "user9", 1, Transaction::ClaimYield);
        let err = submit_signed(&mut engine, &registry, signed, 10).unwrap_err();
        assert_eq!(
            err,
            SubmitError::Verification(VerificationError::UnknownSigner("user9".into()))
        );
    }

    #[test]
    fn envelope_survives_base64_transport() {
        let (_, registry, sk) = setup();
        let signed = SignedTransaction::sign(&sk, "admin", 3, mint_tx());
        let encoded = signed.to_base64().unwrap();
        let decoded = SignedTransaction::from_base64(&encoded).unwrap();
        assert_eq!(decoded, signed);
        registry.verify(&decoded).unwrap();
        assert!(matches!(
            SignedTransaction::from_base64("not base64!"),
            Err(SubmitError::Encoding(_))
        ));
    }

    #[test]
    fn registry_loads_hex_keys() {
        let sk = SigningKey::generate(&mut OsRng);
        let mut entries = BTreeMap::new();
        entries.insert("admin".to_string(), hex::encode(sk.verifying_key().as_bytes()));
        let registry = KeyRegistry::from_hex_map(&entries).unwrap();
        let signed = SignedTransaction::sign(&sk, "admin", 0, Transaction::EmergencyWithdraw);
        registry.verify(&signed).unwrap();

        entries.insert("bad".to_string(), "abcd".to_string());
        assert_eq!(
            KeyRegistry::from_hex_map(&entries).unwrap_err(),
            VerificationError::MalformedKey("bad".into())
        );
    }
}
