//! Row inserts into backend tables.

use serde::Serialize;

use super::client::{check_status, ApiClient, RemoteError};
use super::types::ExpenseRecord;
use crate::sync::coordinator::RemoteStore;

/// Insert `rows` into `table`.
///
/// POST /rest/v1/{table} with a JSON array body. Success means the backend
/// committed every row.
pub async fn insert_rows<T: Serialize + ?Sized>(
    client: &ApiClient,
    table: &str,
    rows: &T,
) -> Result<(), RemoteError> {
    let resp = client
        .authenticated_post(&format!("/rest/v1/{}", table), rows)
        .await
        .map_err(|e| RemoteError::from_transport(&e))?;
    check_status(resp).await?;
    Ok(())
}

impl RemoteStore for ApiClient {
    async fn insert(&self, table: &str, rows: &[ExpenseRecord]) -> Result<(), RemoteError> {
        insert_rows(self, table, rows).await
    }
}
