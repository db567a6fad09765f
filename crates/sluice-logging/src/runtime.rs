use once_cell::sync::Lazy;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingSystem {
    Windows,
    Mac,
    Linux,
}

impl OperatingSystem {
    fn classify(os: &str) -> Option<Self> {
        match os {
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::Mac),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

static OPERATING_SYSTEM: Lazy<Option<OperatingSystem>> =
    Lazy::new(|| OperatingSystem::classify(std::env::consts::OS));

/// Host OS classification, computed once per process.
pub fn operating_system() -> Option<OperatingSystem> {
    *OPERATING_SYSTEM
}
