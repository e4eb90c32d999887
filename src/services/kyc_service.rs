//! KYC progress gate.
//!
//! Document capture and review happen elsewhere; this service only enforces
//! the order of steps (`started -> documents_uploaded -> verified`) so card
//! issuance can rely on `verified` meaning every step completed.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::KycStatus;
use crate::store::{KycDirectory, Store, UserDirectory};

pub struct KycService<S: Store> {
    store: S,
}

impl<S: Store> KycService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn status(&self, user_id: Uuid) -> Result<Option<KycStatus>, AppError> {
        Ok(self.store.kyc_status(user_id).await?)
    }

    /// Advance a user's KYC submission to `to`.
    ///
    /// The step is a single conditional write: it only applies if the
    /// stored status is still the required predecessor.
    ///
    /// # Errors
    ///
    /// - `UserNotFound`: no such user
    /// - `InvalidKycTransition`: the step is out of order
    pub async fn advance(&self, user_id: Uuid, to: KycStatus) -> Result<KycStatus, AppError> {
        if self.store.find_user(user_id).await?.is_none() {
            return Err(AppError::UserNotFound);
        }

        let applied = self
            .store
            .transition_kyc(user_id, to.required_predecessor(), to)
            .await?;

        if !applied {
            return Err(AppError::InvalidKycTransition(to.as_str().to_string()));
        }

        tracing::info!(user_id = %user_id, status = to.as_str(), "KYC status advanced");
        Ok(to)
    }
}
