// Credential store

use std::fmt;

/// Username, password and server address for one Argo CD API server.
///
/// Immutable once built. No validation happens here: empty values are
/// accepted and only fail later when the server rejects the login.
/// `Debug` shows only the server address; there is no `Display` or `Serialize`.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    server_address: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        server_address: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            server_address: server_address.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let creds = Credentials::new("arlon", "secret", "svc:80");
        assert_eq!(creds.username(), "arlon");
        assert_eq!(creds.password(), "secret");
        assert_eq!(creds.server_address(), "svc:80");
    }

    #[test]
    fn test_empty_values_accepted() {
        let creds = Credentials::new("", "", "");
        assert!(creds.username().is_empty());
        assert!(creds.password().is_empty());
        assert!(creds.server_address().is_empty());
    }

    #[test]
    fn test_debug_omits_username_and_password() {
        let creds = Credentials::new("operator-7", "hunter2", "svc:80");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("svc:80"));
        assert!(!debug.contains("operator-7"));
        assert!(!debug.contains("hunter2"));
    }
}
