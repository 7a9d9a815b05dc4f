//! Credential verification plumbed into CONNECT handling.

/// Verifies a username/password pair presented in a CONNECT packet.
///
/// Implementations decide what "valid" means (a password file, a database,
/// an external service); the broker only needs a yes/no answer.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, username: &str, password: &[u8]) -> bool;
}

/// A validator that accepts every connection, used when authentication is
/// disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CredentialValidator for AllowAll {
    fn validate(&self, _username: &str, _password: &[u8]) -> bool {
        true
    }
}

/// Authentication policy applied at CONNECT time.
pub struct AuthConfig {
    /// If `false`, every CONNECT is accepted regardless of credentials.
    pub require_auth: bool,
    /// If `true` while `require_auth` is also `true`, a CONNECT with no
    /// username/password is accepted anyway (anonymous access).
    pub allow_anonymous: bool,
    pub validator: Box<dyn CredentialValidator>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self {
            require_auth: false,
            allow_anonymous: true,
            validator: Box::new(AllowAll),
        }
    }

    /// Returns whether a CONNECT carrying `username`/`password` (both
    /// optional, per the MQTT flags) should be accepted.
    pub fn check(&self, username: Option<&str>, password: Option<&[u8]>) -> bool {
        if !self.require_auth {
            return true;
        }

        match (username, password) {
            (Some(user), Some(pass)) => self.validator.validate(user, pass),
            (None, None) => self.allow_anonymous,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnlyBob;
    impl CredentialValidator for OnlyBob {
        fn validate(&self, username: &str, password: &[u8]) -> bool {
            username == "bob" && password == b"secret"
        }
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = AuthConfig::disabled();
        assert!(auth.check(None, None));
        assert!(auth.check(Some("whoever"), Some(b"wrong")));
    }

    #[test]
    fn required_auth_rejects_bad_credentials() {
        let auth = AuthConfig {
            require_auth: true,
            allow_anonymous: false,
            validator: Box::new(OnlyBob),
        };

        assert!(auth.check(Some("bob"), Some(b"secret")));
        assert!(!auth.check(Some("bob"), Some(b"wrong")));
        assert!(!auth.check(None, None));
    }

    #[test]
    fn required_auth_can_still_allow_anonymous() {
        let auth = AuthConfig {
            require_auth: true,
            allow_anonymous: true,
            validator: Box::new(OnlyBob),
        };

        assert!(auth.check(None, None));
        assert!(!auth.check(Some("mallory"), Some(b"guess")));
    }
}
