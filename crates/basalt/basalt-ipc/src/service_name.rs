use sha2::{Digest, Sha256};
use std::fmt;

/// Longest accepted service name in bytes.
pub const MAX_SERVICE_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceNameError {
    #[error("a service name must not be empty")]
    Empty,

    #[error("a service name must not exceed {MAX_SERVICE_NAME_LENGTH} bytes")]
    ExceedsMaximumLength,
}

/// Name under which a service is registered.
///
/// Names compare byte for byte; `"a"` and `"A"` are different services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: &str) -> Result<Self, ServiceNameError> {
        if name.is_empty() {
            return Err(ServiceNameError::Empty);
        }
        if name.len() > MAX_SERVICE_NAME_LENGTH {
            return Err(ServiceNameError::ExceedsMaximumLength);
        }

        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file-system friendly identifier derived from the name.
    pub(crate) fn hashed(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = ServiceNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert_eq!(ServiceName::new(""), Err(ServiceNameError::Empty));
        let long = "x".repeat(MAX_SERVICE_NAME_LENGTH + 1);
        assert_eq!(
            ServiceName::new(&long),
            Err(ServiceNameError::ExceedsMaximumLength)
        );
        assert!(ServiceName::new(&long[1..]).is_ok());
    }

    #[test]
    fn names_are_case_sensitive() {
        let lower = ServiceName::try_from("sensor/left").unwrap();
        let upper = ServiceName::try_from("Sensor/Left").unwrap();
        assert_ne!(lower, upper);
        assert_ne!(lower.hashed(), upper.hashed());
        assert_eq!(lower.hashed().len(), 32);
        assert_eq!(lower.to_string(), "sensor/left");
    }
}
