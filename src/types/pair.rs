use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Self {
        CurrencyPair {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (base, quote) = s.split_once('/')
            .ok_or_else(|| Error::InvalidPair(s.to_string()))?;

        let valid = |code: &str| !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(Error::InvalidPair(s.to_string()));
        }

        Ok(CurrencyPair::new(base, quote))
    }
}
