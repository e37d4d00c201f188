// Local token validation
//
// This is NOT a cryptographic check. The signature is never verified; a
// token passes when it decodes as a JWT and its exp/nbf claims hold right
// now. The server that issued the token is trusted to have signed it.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, DecodingKey, Validation};

use super::types::TokenClaims;
use crate::error::SessionError;

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    Malformed,
    Expired,
    NotYetValid,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            InvalidReason::Empty => "empty",
            InvalidReason::Malformed => "malformed",
            InvalidReason::Expired => "expired",
            InvalidReason::NotYetValid => "not-yet-valid",
        };
        f.write_str(reason)
    }
}

/// Outcome of [`validate`]
#[derive(Debug, Clone)]
pub enum TokenValidity {
    Valid(TokenClaims),
    Invalid(InvalidReason),
}

impl TokenValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidity::Valid(_))
    }

    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            TokenValidity::Valid(_) => None,
            TokenValidity::Invalid(reason) => Some(*reason),
        }
    }

    pub fn into_result(self) -> Result<TokenClaims, SessionError> {
        match self {
            TokenValidity::Valid(claims) => Ok(claims),
            TokenValidity::Invalid(reason) => Err(SessionError::TokenInvalid(reason)),
        }
    }
}

/// Check that a token is well-formed and inside its exp/nbf window.
pub fn validate(token: &str) -> TokenValidity {
    if token.is_empty() {
        return TokenValidity::Invalid(InvalidReason::Empty);
    }

    let key = DecodingKey::from_secret(&[]);
    match decode::<TokenClaims>(token, &key, &unverified_validation()) {
        Ok(data) => TokenValidity::Valid(data.claims),
        Err(e) => match e.kind() {
            ErrorKind::ExpiredSignature => TokenValidity::Invalid(InvalidReason::Expired),
            ErrorKind::ImmatureSignature => TokenValidity::Invalid(InvalidReason::NotYetValid),
            _ => TokenValidity::Invalid(InvalidReason::Malformed),
        },
    }
}

fn unverified_validation() -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    // Tokens without exp are accepted; the time checks only apply when present
    validation.required_spec_claims.clear();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}
