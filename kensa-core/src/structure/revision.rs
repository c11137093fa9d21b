use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Revision of the FHIR standard a document targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Revision {
    #[default]
    R4,
    R4B,
    R5,
}

impl Revision {
    pub const ALL: [Revision; 3] = [Revision::R4, Revision::R4B, Revision::R5];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::R4 => "R4",
            Self::R4B => "R4B",
            Self::R5 => "R5",
        }
    }

    /// Published version number, as used in `CapabilityStatement.fhirVersion`.
    pub fn fhir_version(self) -> &'static str {
        match self {
            Self::R4 => "4.0.1",
            Self::R4B => "4.3.0",
            Self::R5 => "5.0.0",
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Revision {
    type Err = String;

    /// Accepts release names (`R4`, `r4b`) and version numbers (`4.0`, `4.3.0`, `5.0.0`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R4" | "4.0" | "4.0.1" => Ok(Self::R4),
            "R4B" | "4.3" | "4.3.0" => Ok(Self::R4B),
            "R5" | "5.0" | "5.0.0" => Ok(Self::R5),
            other => Err(format!("unsupported FHIR revision: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_names_and_versions() {
        assert_eq!("R4".parse::<Revision>().unwrap(), Revision::R4);
        assert_eq!("r4b".parse::<Revision>().unwrap(), Revision::R4B);
        assert_eq!("4.0.1".parse::<Revision>().unwrap(), Revision::R4);
        assert_eq!("5.0".parse::<Revision>().unwrap(), Revision::R5);
        assert!("R3".parse::<Revision>().is_err());
    }

    #[test]
    fn test_fhir_version() {
        assert_eq!(Revision::R4B.fhir_version(), "4.3.0");
        assert_eq!(Revision::R5.to_string(), "R5");
    }
}
