//! Users and KYC verification state.
//!
//! Users are owned by the identity side of the system; this service reads
//! them to scope cards and to address notifications.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UnknownVariant;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// KYC progress. Only ever advances one step at a time:
/// `started -> documents_uploaded -> verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Started,
    DocumentsUploaded,
    Verified,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Started => "started",
            KycStatus::DocumentsUploaded => "documents_uploaded",
            KycStatus::Verified => "verified",
        }
    }

    /// The status that must currently be stored for a move to `self`.
    ///
    /// `None` means the step opens a new submission (no prior record).
    pub fn required_predecessor(&self) -> Option<KycStatus> {
        match self {
            KycStatus::Started => None,
            KycStatus::DocumentsUploaded => Some(KycStatus::Started),
            KycStatus::Verified => Some(KycStatus::DocumentsUploaded),
        }
    }
}

impl FromStr for KycStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(KycStatus::Started),
            "documents_uploaded" => Ok(KycStatus::DocumentsUploaded),
            "verified" => Ok(KycStatus::Verified),
            other => Err(UnknownVariant::new("kyc status", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kyc_steps_chain_in_order() {
        assert_eq!(KycStatus::Started.required_predecessor(), None);
        assert_eq!(
            KycStatus::DocumentsUploaded.required_predecessor(),
            Some(KycStatus::Started)
        );
        assert_eq!(
            KycStatus::Verified.required_predecessor(),
            Some(KycStatus::DocumentsUploaded)
        );
    }

    #[test]
    fn kyc_status_parses_snake_case() {
        assert_eq!(
            "documents_uploaded".parse::<KycStatus>().unwrap(),
            KycStatus::DocumentsUploaded
        );
        assert!("approved".parse::<KycStatus>().is_err());
    }
}
