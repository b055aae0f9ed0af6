//! Chain-wide parameters: the genesis record and the consensus mode.

use std::fmt;
use std::str::FromStr;

pub mod genesis;

pub use genesis::Genesis;

/// Every transaction costs exactly one unit of gas.
pub const ONE_UNIT_OF_GAS: u64 = 1;

/// Sentinel for block-range queries meaning "the latest block".
pub const QUERY_LATEST: u64 = u64::MAX;

/// The mining discipline a node runs. Exactly one is active per node,
/// selected at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consensus {
    Pow,
    Poa,
}

impl FromStr for Consensus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "POW" => Ok(Consensus::Pow),
            "POA" => Ok(Consensus::Poa),
            other => Err(format!("unknown consensus mode {other:?}")),
        }
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consensus::Pow => write!(f, "POW"),
            Consensus::Poa => write!(f, "POA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Consensus;

    #[test]
    fn consensus_parses_case_insensitively() {
        assert_eq!("pow".parse::<Consensus>().expect("parse"), Consensus::Pow);
        assert_eq!("PoA".parse::<Consensus>().expect("parse"), Consensus::Poa);
        assert!("pos".parse::<Consensus>().is_err());
    }
}
