use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalEncoder, CanonicalValue};
use crate::types::{BlockHash, Height, Round, ValidatorId};

/// A signed block proposal for a height/round. `valid_round` carries the
/// proposer's claim that `block_hash` already received a 2/3 PreVote polka
/// at that earlier round (Tendermint's "vr" field); `None` means this is a
/// fresh proposal with no such claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    pub block_hash: BlockHash,
    pub valid_round: Option<Round>,
    pub proposer: ValidatorId,
    pub signature: Signature,
}

impl Proposal {
    pub fn new(
        height: Height,
        round: Round,
        block_hash: BlockHash,
        valid_round: Option<Round>,
        signing_key: &SigningKey,
    ) -> Self {
        let proposer = ValidatorId(signing_key.verifying_key());
        let sign_bytes = Self::sign_bytes(height, round, &block_hash, valid_round);
        let signature = signing_key.sign(&sign_bytes);
        Self {
            height,
            round,
            block_hash,
            valid_round,
            proposer,
            signature,
        }
    }

    /// The signature domain: `(height, round, block_hash, valid_round?)` run
    /// through the project's canonical block-content encoding so the bytes
    /// a peer verifies are independent of any particular Rust struct layout.
    fn sign_bytes(
        height: Height,
        round: Round,
        block_hash: &BlockHash,
        valid_round: Option<Round>,
    ) -> Vec<u8> {
        let mut encoder = CanonicalEncoder::new()
            .field("height", CanonicalValue::UInt(height.0))
            .field("round", CanonicalValue::UInt(round.0 as u64))
            .field("block_hash", CanonicalValue::Bytes(block_hash.0.to_vec()));
        if let Some(vr) = valid_round {
            encoder = encoder.field("valid_round", CanonicalValue::UInt(vr.0 as u64));
        }
        encoder.encode()
    }

    pub fn verify(&self) -> bool {
        let sign_bytes = Self::sign_bytes(self.height, self.round, &self.block_hash, self.valid_round);
        self.proposer
            .0
            .verify(&sign_bytes, &self.signature)
            .is_ok()
    }
}
