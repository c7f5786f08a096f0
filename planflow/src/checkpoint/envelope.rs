//! The versioned, digest-protected checkpoint record.

use crate::context::WorkflowContext;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A persisted workflow context.
///
/// The context carries `current_stage` and `history` itself, so the
/// envelope only adds integrity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version of the envelope.
    pub version: u32,
    /// The workflow the context belongs to.
    pub workflow_id: Uuid,
    /// When the envelope was sealed.
    pub saved_at: DateTime<Utc>,
    /// Hex SHA-256 of the serialized context.
    pub digest: String,
    /// The persisted context.
    pub context: WorkflowContext,
}

impl Checkpoint {
    /// Current envelope schema version.
    pub const VERSION: u32 = 1;

    /// Wraps `context` in a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the context cannot be encoded.
    pub fn seal(context: &WorkflowContext) -> Result<Self> {
        Ok(Self {
            version: Self::VERSION,
            workflow_id: context.workflow_id(),
            saved_at: Utc::now(),
            digest: digest_of(context)?,
            context: context.clone(),
        })
    }

    /// Checks version, id and digest.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch.
    pub fn verify(&self) -> std::result::Result<(), String> {
        if self.version != Self::VERSION {
            return Err(format!(
                "unsupported checkpoint version {} (expected {})",
                self.version,
                Self::VERSION
            ));
        }
        if self.workflow_id != self.context.workflow_id() {
            return Err(format!(
                "envelope id {} does not match context id {}",
                self.workflow_id,
                self.context.workflow_id()
            ));
        }
        let actual = digest_of(&self.context).map_err(|err| err.to_string())?;
        if actual != self.digest {
            return Err(format!("digest mismatch: stored {}, computed {actual}", self.digest));
        }
        Ok(())
    }

    /// Encodes the envelope as JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and verifies an envelope.
    ///
    /// # Errors
    ///
    /// Returns a description of the decoding or verification failure.
    pub fn from_json(raw: &str) -> std::result::Result<Self, String> {
        let checkpoint: Self = serde_json::from_str(raw).map_err(|err| err.to_string())?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }
}

fn digest_of(context: &WorkflowContext) -> Result<String> {
    let bytes = serde_json::to_vec(context)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
