//! Identifier types used throughout the entitlement core.
//!
//! All identifiers are opaque strings minted elsewhere (the auth backend,
//! the store listing, the purchase provider). They are wrapped so that an
//! account id can never be passed where a purchase token is expected.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Parses an identifier, rejecting empty or blank input.
            pub fn parse(s: &str) -> Result<Self, Error> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(Error::InvalidId(format!("{} must not be empty", $what)));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of an authenticated account (the remote document key).
    AccountId,
    "account id"
);

string_id!(
    /// Identifier of the linked partner account.
    PartnerId,
    "partner id"
);

string_id!(
    /// Store listing identifier of a purchasable product.
    ProductId,
    "product id"
);

string_id!(
    /// Opaque token naming one purchase transaction. The idempotence key for
    /// validation and acknowledgment.
    PurchaseToken,
    "purchase token"
);
