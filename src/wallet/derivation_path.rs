//! Derivation Paths
//!
//! Both chains derive under the MVC coin type: `m/44'/10001'/<account>'/0/<i>`.
//! DOGE reuses the same keys and only changes the address encoding.

use crate::error::{EngineError, EngineResult};

pub const PURPOSE: u32 = 44;
pub const MVC_COIN_TYPE: u32 = 10001;
pub const EXTERNAL_CHAIN: u32 = 0;

/// Upper bound for reverse address lookups
pub const DERIVE_MAX_DEPTH: u32 = 1000;

/// Account-level path, e.g. `m/44'/10001'/0'`
pub fn account_path(account: u32) -> String {
    format!("m/{}'/{}'/{}'", PURPOSE, MVC_COIN_TYPE, account)
}

/// Full path of one receiving address
pub fn address_path(account: u32, index: u32) -> String {
    format!("{}/{}/{}", account_path(account), EXTERNAL_CHAIN, index)
}

/// Address index (last component) of a path such as `m/44'/10001'/0'/0/7`
pub fn parse_address_index(path: &str) -> EngineResult<u32> {
    let last = path
        .trim()
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::invalid_input(format!("Empty derivation path '{}'", path)))?;

    if last.ends_with('\'') || last.ends_with('h') {
        return Err(EngineError::invalid_input(format!(
            "Address index in '{}' must not be hardened",
            path
        )));
    }

    last.parse::<u32>()
        .map_err(|_| EngineError::invalid_input(format!("Invalid address index in '{}'", path)))
}

/// Address index of a receiving path on account 0, e.g. `m/44'/10001'/0'/0/3`
pub fn receiving_index(path: &str) -> EngineResult<u32> {
    let index = parse_address_index(path)?;
    let expected = address_path(0, index);
    if path.trim() != expected {
        return Err(EngineError::invalid_input(format!(
            "'{}' is not a receiving path of account 0 (expected {})",
            path, expected
        )));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(account_path(0), "m/44'/10001'/0'");
        assert_eq!(address_path(0, 7), "m/44'/10001'/0'/0/7");
    }

    #[test]
    fn test_parse_address_index() {
        assert_eq!(parse_address_index("m/44'/10001'/0'/0/7").unwrap(), 7);
        assert_eq!(parse_address_index(&address_path(2, 999)).unwrap(), 999);
        assert!(parse_address_index("m/44'/10001'/0'").is_err());
        assert!(parse_address_index("").is_err());
        assert!(parse_address_index("m/0/x").is_err());
    }

    #[test]
    fn test_receiving_index() {
        assert_eq!(receiving_index("m/44'/10001'/0'/0/3").unwrap(), 3);
        assert!(receiving_index("m/44'/10001'/2'/0/3").is_err());
        assert!(receiving_index("m/44'/10001'/0'/1/3").is_err());
        assert!(receiving_index("m/44'/0'/0'/0/3").is_err());
    }
}
