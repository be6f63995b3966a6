/*!
 * Per-request object storage credentials
 */

/// Credential bundle passed with an aggregate request.
///
/// Every field is optional; unset fields fall back to the backend's own
/// resolution chain (environment variables, instance metadata, credential
/// files). The bundle also keys client reuse in the client manager, so a
/// rotated credential never hits a stale client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.access_key_id.is_none()
            && self.secret_access_key.is_none()
            && self.session_token.is_none()
            && self.region.is_none()
            && self.endpoint.is_none()
    }

    /// Export the set fields as key/value pairs for a client configuration.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let mut push = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                params.push((key.to_string(), value.clone()));
            }
        };
        push("access_key_id", &self.access_key_id);
        push("secret_access_key", &self.secret_access_key);
        push("session_token", &self.session_token);
        push("region", &self.region);
        push("endpoint", &self.endpoint);
        params
    }
}
