//! Backend reachability check.

use super::client::{check_status, ApiClient, RemoteError};
use crate::connectivity::Reachability;

/// GET /auth/v1/health. Any 2xx answer means the backend is reachable.
pub async fn check_health(client: &ApiClient) -> Result<(), RemoteError> {
    let resp = client
        .authenticated_get("/auth/v1/health")
        .await
        .map_err(|e| RemoteError::from_transport(&e))?;
    check_status(resp).await?;
    Ok(())
}

impl Reachability for ApiClient {
    async fn probe(&self) -> Result<(), RemoteError> {
        check_health(self).await
    }
}
