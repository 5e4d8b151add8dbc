//! Protected resource endpoints
//!
//! Thin typed access to the backend's list endpoints. Every call goes
//! through [`SessionManager::send`], so it carries the bearer credential and
//! survives an expired access token.

use crate::rest::{Envelope, RestError, RestRequest};
use crate::session::{AuthError, SessionManager};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Backend collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// `GET /location`
    Locations,
    /// `GET /tour`
    Tours,
    /// `GET /user/all`
    Users,
    /// `GET /activity`
    Activities,
}

impl Resource {
    /// Endpoint path
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Locations => "/location",
            Resource::Tours => "/tour",
            Resource::Users => "/user/all",
            Resource::Activities => "/activity",
        }
    }
}

/// Fetches resources on behalf of the current session
#[derive(Debug, Clone)]
pub struct ResourceClient {
    session: Arc<SessionManager>,
}

impl ResourceClient {
    /// Create a client sharing `session`
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Fetch a resource, decoding the envelope's `data`
    pub async fn fetch<T>(&self, resource: Resource) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
    {
        self.fetch_with_params(resource, &[]).await
    }

    /// Fetch a resource with query parameters
    pub async fn fetch_with_params<T>(
        &self,
        resource: Resource,
        params: &[(&str, &str)],
    ) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
    {
        let request = params
            .iter()
            .fold(RestRequest::get(resource.path()), |request, (key, value)| {
                request.param(*key, *value)
            });

        let response = self.session.send::<Envelope<T>>(request).await?;
        let status = response.status;
        response
            .data
            .into_data()
            .map_err(|message| AuthError::Request(RestError::new(status, "Unsuccessful", message)))
    }
}
