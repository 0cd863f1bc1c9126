//! Credential container with automatic memory zeroing.

use zeroize::{Zeroize, Zeroizing};

/// Username and optional password, zeroed when dropped.
///
/// # Example
///
/// ```rust
/// use datadict_core::security::Credentials;
///
/// let creds = Credentials::new("admin".to_string(), Some("secret".to_string()));
/// assert_eq!(creds.username(), "admin");
/// assert!(creds.has_password());
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Credentials with no username and no password
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Username, or `None` when it is blank
    pub fn username_opt(&self) -> Option<&str> {
        let name = self.username.as_str();
        (!name.trim().is_empty()).then_some(name)
    }

    /// Password, for handing to a driver. Never log the returned value.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn has_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_str())
            .field("password", &self.has_password().then_some("****"))
            .finish()
    }
}
