//! Business identifier codes (BIC, ISO 9362).
//!
//! Layout: 4-letter institution code, 2-letter country code, 2-character
//! location code and an optional 3-character branch code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Branch code used for a primary office when no branch is given.
pub const PRIMARY_OFFICE_BRANCH: &str = "XXX";

/// Errors that can occur when parsing a BIC
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BicError {
    #[error("BIC is empty")]
    Empty,

    #[error("BIC {0} must be 8 or 11 characters")]
    Length(String),

    #[error("BIC {0} has an invalid institution code")]
    Institution(String),

    #[error("BIC {0} has an invalid country code")]
    Country(String),

    #[error("BIC {0} has an invalid location code")]
    Location(String),

    #[error("BIC {0} has an invalid branch code")]
    Branch(String),
}

/// A structurally valid BIC.
///
/// # Examples
/// ```
/// use swift_pipeline::Bic;
///
/// let bic: Bic = "DEUTDEFF500".parse().unwrap();
/// assert_eq!(bic.country(), "DE");
/// assert_eq!(bic.branch(), Some("500"));
/// assert_eq!(bic.head(), "DEUTDEFF");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bic(String);

impl Bic {
    /// Parses a BIC, requiring upper-case input with no whitespace.
    pub fn parse(code: &str) -> Result<Self, BicError> {
        if code.is_empty() {
            return Err(BicError::Empty);
        }
        if !code.is_ascii() || (code.len() != 8 && code.len() != 11) {
            return Err(BicError::Length(code.to_string()));
        }

        let upper_alpha = |s: &str| s.bytes().all(|b| b.is_ascii_uppercase());
        let upper_alnum = |s: &str| {
            s.bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        };

        if !upper_alpha(&code[0..4]) {
            return Err(BicError::Institution(code.to_string()));
        }
        if !upper_alpha(&code[4..6]) {
            return Err(BicError::Country(code.to_string()));
        }
        if !upper_alnum(&code[6..8]) {
            return Err(BicError::Location(code.to_string()));
        }
        if code.len() == 11 && !upper_alnum(&code[8..11]) {
            return Err(BicError::Branch(code.to_string()));
        }

        Ok(Bic(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn institution(&self) -> &str {
        &self.0[0..4]
    }

    pub fn country(&self) -> &str {
        &self.0[4..6]
    }

    pub fn location(&self) -> &str {
        &self.0[6..8]
    }

    /// Branch code, if the BIC carries one.
    pub fn branch(&self) -> Option<&str> {
        self.0.get(8..11)
    }

    /// The 8-character institution + country + location part.
    pub fn head(&self) -> &str {
        &self.0[0..8]
    }

    /// Returns the 11-character form, filling in the primary-office branch.
    pub fn to_full(&self) -> Bic {
        match self.branch() {
            Some(_) => self.clone(),
            None => Bic(format!("{}{}", self.0, PRIMARY_OFFICE_BRANCH)),
        }
    }
}

/// Upper-cases a candidate code and strips whitespace.
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Country segment of a possibly malformed code, if one can be read.
pub fn country_of(code: &str) -> Option<&str> {
    code.get(4..6)
        .filter(|c| c.bytes().all(|b| b.is_ascii_alphabetic()))
}

impl FromStr for Bic {
    type Err = BicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bic::parse(s)
    }
}

impl TryFrom<String> for Bic {
    type Error = BicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Bic::parse(&value)
    }
}

impl From<Bic> for String {
    fn from(bic: Bic) -> Self {
        bic.0
    }
}

impl fmt::Display for Bic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
