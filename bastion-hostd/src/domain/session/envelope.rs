use super::aggregate::SessionState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported envelope version {0}")]
    Version(u32),
    #[error("checksum mismatch")]
    Checksum,
    #[error("encoding session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk form of a session with an integrity checksum over its body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub checksum: String,
    pub session: SessionState,
}

impl PersistedSession {
    pub fn seal(session: SessionState) -> Result<Self, EnvelopeError> {
        let checksum = checksum_of(&session)?;
        Ok(Self {
            version: ENVELOPE_VERSION,
            checksum,
            session,
        })
    }

    pub fn open(self) -> Result<SessionState, EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::Version(self.version));
        }
        if checksum_of(&self.session)? != self.checksum {
            return Err(EnvelopeError::Checksum);
        }
        Ok(self.session)
    }
}

fn checksum_of(session: &SessionState) -> Result<String, EnvelopeError> {
    let body = serde_json::to_vec(session)?;
    Ok(hex::encode(Sha256::digest(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::InstanceId;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn tampered_body_is_detected() {
        let origin = InstanceId::new();
        let mut state = SessionState::new(Duration::from_secs(60), origin.clone());
        state.set("k", json!("v"), &origin);
        let mut sealed = PersistedSession::seal(state.clone()).unwrap();
        assert_eq!(sealed.clone().open().unwrap(), state);

        sealed.session.data.insert("k".into(), json!("evil"));
        assert!(matches!(sealed.open(), Err(EnvelopeError::Checksum)));
    }
}
