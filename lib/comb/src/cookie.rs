use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Shared secret configured on every cluster member. The value is never put
/// on the wire and never rendered by `Debug`.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Cookie(String);

impl Cookie {
    #[inline]
    pub fn new<S: Into<String>>(secret: S) -> Cookie {
        Cookie(secret.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Cookie {
    #[inline]
    fn from(secret: &str) -> Cookie {
        Cookie(secret.to_string())
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Cookie(****)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts() {
        let cookie = Cookie::from("super secret");
        assert_eq!(format!("{:?}", cookie), "Cookie(****)");
    }

    #[test]
    fn test_accessor() {
        assert_eq!(Cookie::from("monster").as_str(), "monster");
        assert!(Cookie::default().is_empty());
    }
}
