use forge_kv::StoreError;

pub type QuotaResult<T> = Result<T, QuotaError>;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The backing store could not be reached. Consumption fails closed on
    /// this error; it never degrades to an implicit grant.
    #[error("quota storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
    /// Conditional updates kept losing to concurrent writers.
    #[error("quota update contention for '{user_id}' after {attempts} attempts")]
    Contention { user_id: String, attempts: u32 },
    #[error("caller '{caller_id}' is not allowed to manage quota for '{user_id}'")]
    Unauthorized { caller_id: String, user_id: String },
}
