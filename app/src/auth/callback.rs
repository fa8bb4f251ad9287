//! Parameters delivered to the OAuth callback route.

use reqwest::Url;
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// Token or error returned by the provider redirect.
///
/// The implicit flow puts these in the URL fragment, error redirects
/// usually use the query string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OAuthCallback {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthCallback {
    /// Parse an `a=1&b=2` encoded string.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        // Borrow the URL parser's form decoding for a bare parameter string.
        let url = Url::parse(&format!("callback:?{}", encoded.trim_start_matches(['#', '?'])))
            .map_err(|e| AuthError::OAuthRedirect(format!("invalid callback parameters: {}", e)))?;
        Ok(Self::from_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned()))))
    }

    fn from_pairs(pairs: impl Iterator<Item = (String, String)>) -> Self {
        let mut callback = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "access_token" => callback.access_token = Some(value),
                "refresh_token" => callback.refresh_token = Some(value),
                "expires_in" => callback.expires_in = value.parse().ok(),
                "error" => callback.error = Some(value),
                "error_code" => callback.error_code = Some(value),
                "error_description" => callback.error_description = Some(value),
                _ => {}
            }
        }
        callback
    }

    /// Human-readable error reported by the provider, if the redirect failed.
    pub fn error_message(&self) -> Option<String> {
        if self.error.is_none() && self.error_code.is_none() && self.error_description.is_none() {
            return None;
        }
        Some(
            self.error_description
                .clone()
                .or_else(|| self.error_code.clone())
                .or_else(|| self.error.clone())
                .unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_from_fragment() {
        let cb = OAuthCallback::from_encoded(
            "#access_token=abc&refresh_token=def&expires_in=3600&token_type=bearer",
        )
        .unwrap();
        assert_eq!(cb.access_token.as_deref(), Some("abc"));
        assert_eq!(cb.refresh_token.as_deref(), Some("def"));
        assert_eq!(cb.expires_in, Some(3600));
        assert!(cb.error_message().is_none());
    }

    #[test]
    fn test_error_from_query_is_decoded() {
        let cb = OAuthCallback::from_encoded("?error=access_denied&error_description=User+cancelled%21").unwrap();
        assert!(cb.access_token.is_none());
        assert_eq!(cb.error_message().as_deref(), Some("User cancelled!"));
    }

    #[test]
    fn test_error_code_used_when_description_missing() {
        let cb = OAuthCallback::from_encoded("#error_code=otp_expired").unwrap();
        assert_eq!(cb.error_message().as_deref(), Some("otp_expired"));
    }

    #[test]
    fn test_blank_and_unknown_parameters_are_ignored() {
        let cb = OAuthCallback::from_encoded("access_token=&expires_in=soon&state=xyz").unwrap();
        assert_eq!(cb, OAuthCallback::default());
        assert!(cb.error_message().is_none());
    }
}
