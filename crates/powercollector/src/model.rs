//! Inventory records for HMCs, managed systems and their partitions.
//!
//! The JSON layout matches the files written by earlier powercollector
//! releases, so saved inventories and follow-up manifests stay loadable.

use serde::{Deserialize, Serialize};

/// Operating environment of a partition, as reported by the HMC or
/// detected over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetEnvironment {
    /// Not reported and not detected yet.
    #[default]
    Unknown,
    /// AIX or Linux partition (the HMC does not tell them apart).
    AixOrLinux,
    /// Virtual I/O Server.
    Vios,
    /// IBM i (OS/400) partition.
    IbmI,
}

impl TargetEnvironment {
    /// Value used by the HMC `lpar_env` attribute.
    #[must_use]
    pub fn as_hmc_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::AixOrLinux => "aixlinux",
            Self::Vios => "vioserver",
            Self::IbmI => "os400",
        }
    }

    /// Whether this environment needs the `oem_setup_env` bootstrap.
    #[must_use]
    pub fn is_vios(&self) -> bool {
        matches!(self, Self::Vios)
    }
}

impl From<&str> for TargetEnvironment {
    fn from(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        if value.contains("vioserver") || value == "vios" {
            Self::Vios
        } else if value.contains("os400") || value == "ibm_i" {
            Self::IbmI
        } else if value.contains("aixlinux") || value == "aix_or_linux" {
            Self::AixOrLinux
        } else {
            Self::Unknown
        }
    }
}

impl From<String> for TargetEnvironment {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<TargetEnvironment> for String {
    fn from(value: TargetEnvironment) -> Self {
        value.as_hmc_str().to_string()
    }
}

impl std::fmt::Display for TargetEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::AixOrLinux => write!(f, "aix_or_linux"),
            Self::Vios => write!(f, "vios"),
            Self::IbmI => write!(f, "ibm_i"),
        }
    }
}

/// A logical partition subject to OS-level collection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    /// Partition name.
    pub name: String,
    /// Partition ID on the managed system.
    pub id: String,
    /// Operating environment.
    pub env: TargetEnvironment,
    /// OS level string reported through RMC (e.g. "AIX 7.2 7200-05-03").
    pub os_level: String,
    /// RMC address used to reach the partition. Empty when unknown.
    #[serde(rename = "rmc_ip", alias = "management_ip")]
    pub management_ip: String,
    /// Partition state (e.g. "Running", "Not Activated").
    pub state: String,
}

impl Target {
    /// Target addressed directly by host name or IP, assumed running.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        Self {
            name: address.to_string(),
            management_ip: address.to_string(),
            state: "Running".to_string(),
            ..Self::default()
        }
    }

    /// Whether the partition reports a running state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.contains("Running")
    }
}

/// Firmware levels of one service processor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fsp {
    pub temp_ecnumber: String,
    pub temp_level: String,
    pub perm_ecnumber: String,
    pub perm_level: String,
}

/// One physical I/O slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IoSlot {
    pub feature_codes: String,
    pub description: String,
    pub unit_phys_loc: String,
    pub phys_loc: String,
    pub drc_name: String,
}

/// One I/O enclosure and its hub ports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnclosureTopology {
    pub enclosure: String,
    pub leading_hub_port: String,
    pub trailing_hub_port: String,
}

/// A physical server managed by the HMC.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedSystem {
    /// System name as known to the HMC.
    pub name: String,
    /// Machine type and model.
    pub mt: String,
    /// Serial number.
    pub serial: String,
    pub fsp_primary: Fsp,
    pub fsp_secondary: Fsp,
    /// Raw capabilities string.
    pub capabilities: String,
    pub io_slots: Vec<IoSlot>,
    /// Partitions defined on this system.
    pub partition_list: Vec<Target>,
    pub enclosure_topo: Vec<EnclosureTopology>,
}

impl ManagedSystem {
    /// Create a system with identity only.
    #[must_use]
    pub fn new(name: &str, mt: &str, serial: &str) -> Self {
        Self {
            name: name.to_string(),
            mt: mt.to_string(),
            serial: serial.to_string(),
            ..Self::default()
        }
    }
}

/// A Hardware Management Console and everything it manages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hmc {
    pub hostname: String,
    pub domain: String,
    pub version: String,
    pub mt: String,
    pub serial: String,
    pub managed_systems: Vec<ManagedSystem>,
}
