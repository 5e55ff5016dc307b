//! Plain value types returned by the core.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::decode_fixed_str;
use crate::native::RawNodeInfo;

/// Runtime ID of an active domain.
///
/// IDs are assigned by the hypervisor when a domain starts and are only
/// meaningful while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub u32);

impl DomainId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for DomainId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host hardware information, copied out of the native layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// CPU model string
    pub model: String,
    /// Memory size in KiB
    pub memory_kib: u64,
    /// Number of active CPUs
    pub cpus: u32,
    /// Expected CPU frequency in MHz
    pub mhz: u32,
    /// Number of NUMA cells
    pub numa_nodes: u32,
    /// Sockets per NUMA cell
    pub sockets: u32,
    /// Cores per socket
    pub cores: u32,
    /// Threads per core
    pub threads: u32,
}

impl NodeInfo {
    /// Memory size in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.memory_kib.saturating_mul(1024)
    }

    /// Logical CPUs implied by the topology fields.
    pub fn topology_cpus(&self) -> u32 {
        self.numa_nodes
            .saturating_mul(self.sockets)
            .saturating_mul(self.cores)
            .saturating_mul(self.threads)
    }
}

impl From<&RawNodeInfo> for NodeInfo {
    fn from(raw: &RawNodeInfo) -> Self {
        Self {
            model: decode_fixed_str(&raw.model),
            memory_kib: raw.memory,
            cpus: raw.cpus,
            mhz: raw.mhz,
            numa_nodes: raw.nodes,
            sockets: raw.sockets,
            cores: raw.cores,
            threads: raw.threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_fixed_str;

    #[test]
    fn test_node_info_from_raw() {
        let mut raw = RawNodeInfo {
            memory: 16 * 1024 * 1024,
            cpus: 8,
            mhz: 2400,
            nodes: 1,
            sockets: 1,
            cores: 4,
            threads: 2,
            ..RawNodeInfo::default()
        };
        encode_fixed_str("x86_64", &mut raw.model);

        let info = NodeInfo::from(&raw);
        assert_eq!(info.model, "x86_64");
        assert_eq!(info.memory_bytes(), 16 * 1024 * 1024 * 1024);
        assert_eq!(info.cpus, 8);
        assert_eq!(info.topology_cpus(), 8);
    }

    #[test]
    fn test_domain_id_display() {
        assert_eq!(DomainId::from(7).to_string(), "7");
        assert_eq!(DomainId(3).get(), 3);
    }
}
