//! Redfish privileges and the built-in roles that grant them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Privilege {
    Login,
    ConfigureManager,
    ConfigureUsers,
    ConfigureSelf,
    ConfigureComponents,
}

impl Privilege {
    pub const ALL: [Self; 5] = [
        Self::Login,
        Self::ConfigureManager,
        Self::ConfigureUsers,
        Self::ConfigureSelf,
        Self::ConfigureComponents,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::ConfigureManager => "ConfigureManager",
            Self::ConfigureUsers => "ConfigureUsers",
            Self::ConfigureSelf => "ConfigureSelf",
            Self::ConfigureComponents => "ConfigureComponents",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown privilege: {s}"))
    }
}

/// Built-in account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Administrator,
    Operator,
    ReadOnly,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "Administrator",
            Self::Operator => "Operator",
            Self::ReadOnly => "ReadOnly",
        }
    }

    pub fn privileges(self) -> Vec<Privilege> {
        match self {
            Self::Administrator => Privilege::ALL.to_vec(),
            Self::Operator => vec![
                Privilege::Login,
                Privilege::ConfigureComponents,
                Privilege::ConfigureSelf,
            ],
            Self::ReadOnly => vec![Privilege::Login, Privilege::ConfigureSelf],
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Administrator" => Ok(Self::Administrator),
            "Operator" => Ok(Self::Operator),
            "ReadOnly" => Ok(Self::ReadOnly),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Serialize a privilege set for the sessions table.
pub fn encode_privileges(privileges: &[Privilege]) -> String {
    let names: Vec<&str> = privileges.iter().map(Privilege::as_str).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a stored privilege set. Unknown names are dropped.
pub fn decode_privileges(json: &str) -> Result<Vec<Privilege>, serde_json::Error> {
    let names: Vec<String> = serde_json::from_str(json)?;
    Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
}
