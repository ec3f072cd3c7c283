//! Deployment mode: which destination roles a routing rule carries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::mapping::Role;

/// Operating mode for the duplicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TeeMode {
    /// One authoritative primary plus a best-effort shadow.
    #[default]
    #[serde(rename = "shadow")]
    Shadow,
    /// Two mandatory primaries; only `primary1` answers the client.
    #[serde(rename = "dual-primary")]
    DualPrimary,
}

impl TeeMode {
    /// Destination roles for this mode, in dial order.
    pub fn roles(self) -> &'static [Role] {
        match self {
            TeeMode::Shadow => &[Role::Primary, Role::Shadow],
            TeeMode::DualPrimary => &[Role::Primary1, Role::Primary2],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TeeMode::Shadow => "shadow",
            TeeMode::DualPrimary => "dual-primary",
        }
    }
}

impl fmt::Display for TeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "shadow" => Ok(TeeMode::Shadow),
            "dual-primary" => Ok(TeeMode::DualPrimary),
            other => anyhow::bail!("unknown mode {other:?} (expected \"shadow\" or \"dual-primary\")"),
        }
    }
}
