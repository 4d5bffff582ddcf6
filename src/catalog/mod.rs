use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::network::PrivilegeLevel;

/// ATT&CK tactics in kill chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tactic {
    InitialAccess,
    Execution,
    Persistence,
    PrivilegeEscalation,
    DefenseEvasion,
    CredentialAccess,
    Discovery,
    LateralMovement,
    Collection,
    Exfiltration,
    Impact,
}

impl Tactic {
    pub const ALL: [Tactic; 11] = [
        Tactic::InitialAccess,
        Tactic::Execution,
        Tactic::Persistence,
        Tactic::PrivilegeEscalation,
        Tactic::DefenseEvasion,
        Tactic::CredentialAccess,
        Tactic::Discovery,
        Tactic::LateralMovement,
        Tactic::Collection,
        Tactic::Exfiltration,
        Tactic::Impact,
    ];
}

/// A condition checked against simulation state before a technique runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    PositionExternal,
    PositionInternal,
    PositionOnHost,
    PrivilegeUser,
    PrivilegeAdmin,
    ServiceRunning(&'static str),
    VulnerabilityExists,
    CredentialAvailable,
    HostNotIsolated,
    OsWindows,
    OsLinux,
    HostIsDc,
    HasCredentialCache,
    DataStaged,
}

/// A state change applied when a technique succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Gain a foothold on the target. `privilege: None` inherits the
    /// privilege of the credential that enabled the technique.
    Foothold { privilege: Option<PrivilegeLevel> },
    PrivEscalation { to: PrivilegeLevel },
    CredentialHarvest,
    Persistence,
    LateralMove,
    Exfil,
    Impact,
    ExecuteCommand,
    DiscoverHosts,
    ReduceDetection(f64),
    IncreaseStealth(f64),
    StageData,
}

/// Static definition of a MITRE ATT&CK technique for simulation.
#[derive(Debug, Clone)]
pub struct TechniqueSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub tactic: Tactic,
    pub preconditions: Vec<Precondition>,
    pub effects: Vec<Effect>,
    pub base_success: f64,
    pub stealth_base: f64,
    pub data_sources: Vec<&'static str>,
}

impl TechniqueSpec {
    pub fn has_data_source(&self, source: &str) -> bool {
        self.data_sources.iter().any(|s| *s == source)
    }
}

/// Immutable registry of all modeled techniques. Catalog order is the
/// canonical technique ordering used for presence vectors in metrics.
pub struct TechniqueCatalog {
    specs: Vec<TechniqueSpec>,
    index: HashMap<&'static str, usize>,
}

impl TechniqueCatalog {
    fn build() -> Self {
        let specs = technique_list();
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id, i))
            .collect();
        Self { specs, index }
    }

    pub fn get(&self, technique_id: &str) -> Option<&TechniqueSpec> {
        self.index.get(technique_id).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, technique_id: &str) -> bool {
        self.index.contains_key(technique_id)
    }

    /// Position of a technique in catalog order, for presence vectors.
    pub fn ordinal(&self, technique_id: &str) -> Option<usize> {
        self.index.get(technique_id).copied()
    }

    pub fn by_tactic(&self, tactic: Tactic) -> Vec<&TechniqueSpec> {
        self.specs.iter().filter(|t| t.tactic == tactic).collect()
    }

    pub fn initial_access(&self) -> Vec<&TechniqueSpec> {
        self.by_tactic(Tactic::InitialAccess)
    }

    pub fn all(&self) -> &[TechniqueSpec] {
        &self.specs
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.specs.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// The process-wide technique catalog. Initialized once, never mutated.
pub fn catalog() -> &'static TechniqueCatalog {
    static CATALOG: OnceLock<TechniqueCatalog> = OnceLock::new();
    CATALOG.get_or_init(TechniqueCatalog::build)
}

fn technique_list() -> Vec<TechniqueSpec> {
    use crate::catalog::{Effect as E, Precondition as P, Tactic as T};
    use crate::network::PrivilegeLevel as Priv;

    vec![
        // ── Initial Access ──
        TechniqueSpec {
            id: "T1566.001",
            name: "Phishing: Spearphishing Attachment",
            tactic: T::InitialAccess,
            preconditions: vec![P::PositionExternal],
            effects: vec![E::Foothold { privilege: Some(Priv::User) }],
            base_success: 0.35,
            stealth_base: 0.6,
            data_sources: vec!["Email Gateway", "Process Creation", "File Creation"],
        },
        TechniqueSpec {
            id: "T1566.002",
            name: "Phishing: Spearphishing Link",
            tactic: T::InitialAccess,
            preconditions: vec![P::PositionExternal],
            effects: vec![E::Foothold { privilege: Some(Priv::User) }],
            base_success: 0.30,
            stealth_base: 0.7,
            data_sources: vec!["Web Proxy", "DNS", "Process Creation"],
        },
        TechniqueSpec {
            id: "T1190",
            name: "Exploit Public-Facing Application",
            tactic: T::InitialAccess,
            preconditions: vec![P::PositionExternal, P::VulnerabilityExists],
            effects: vec![E::Foothold { privilege: Some(Priv::User) }],
            base_success: 0.70,
            stealth_base: 0.4,
            data_sources: vec!["Network Traffic", "Application Log", "Web Server Log"],
        },
        TechniqueSpec {
            id: "T1133",
            name: "External Remote Services",
            tactic: T::InitialAccess,
            preconditions: vec![P::PositionExternal, P::CredentialAvailable],
            effects: vec![E::Foothold { privilege: None }],
            base_success: 0.85,
            stealth_base: 0.8,
            data_sources: vec!["Authentication Log", "Network Connection"],
        },
        TechniqueSpec {
            id: "T1078",
            name: "Valid Accounts",
            tactic: T::InitialAccess,
            preconditions: vec![P::CredentialAvailable],
            effects: vec![E::Foothold { privilege: None }],
            base_success: 0.90,
            stealth_base: 0.9,
            data_sources: vec!["Authentication Log", "Account Usage Audit"],
        },
        // ── Execution ──
        TechniqueSpec {
            id: "T1059.001",
            name: "Command and Scripting: PowerShell",
            tactic: T::Execution,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeUser],
            effects: vec![E::ExecuteCommand],
            base_success: 0.85,
            stealth_base: 0.5,
            data_sources: vec!["Script Execution", "Process Creation", "Command Line"],
        },
        TechniqueSpec {
            id: "T1059.004",
            name: "Command and Scripting: Unix Shell",
            tactic: T::Execution,
            preconditions: vec![P::PositionOnHost, P::OsLinux, P::PrivilegeUser],
            effects: vec![E::ExecuteCommand],
            base_success: 0.90,
            stealth_base: 0.6,
            data_sources: vec!["Process Creation", "Command Line Audit"],
        },
        TechniqueSpec {
            id: "T1047",
            name: "Windows Management Instrumentation",
            tactic: T::Execution,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeAdmin],
            effects: vec![E::ExecuteCommand],
            base_success: 0.80,
            stealth_base: 0.65,
            data_sources: vec!["WMI Trace", "Process Creation"],
        },
        // ── Persistence ──
        TechniqueSpec {
            id: "T1053.005",
            name: "Scheduled Task/Job: Scheduled Task",
            tactic: T::Persistence,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser],
            effects: vec![E::Persistence],
            base_success: 0.80,
            stealth_base: 0.5,
            data_sources: vec!["Scheduled Task Creation", "Process Creation"],
        },
        TechniqueSpec {
            id: "T1543.003",
            name: "Create or Modify System Process: Windows Service",
            tactic: T::Persistence,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeAdmin],
            effects: vec![E::Persistence],
            base_success: 0.75,
            stealth_base: 0.4,
            data_sources: vec!["Service Creation", "Windows Registry"],
        },
        TechniqueSpec {
            id: "T1136.001",
            name: "Create Account: Local Account",
            tactic: T::Persistence,
            preconditions: vec![P::PositionOnHost, P::PrivilegeAdmin],
            effects: vec![E::Persistence, E::CredentialHarvest],
            base_success: 0.90,
            stealth_base: 0.3,
            data_sources: vec!["Account Creation", "Security Log"],
        },
        TechniqueSpec {
            id: "T1547.001",
            name: "Boot or Logon Autostart: Registry Run Keys",
            tactic: T::Persistence,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeUser],
            effects: vec![E::Persistence],
            base_success: 0.85,
            stealth_base: 0.55,
            data_sources: vec!["Windows Registry", "Process Creation"],
        },
        // ── Privilege Escalation ──
        TechniqueSpec {
            id: "T1068",
            name: "Exploitation for Privilege Escalation",
            tactic: T::PrivilegeEscalation,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser, P::VulnerabilityExists],
            effects: vec![E::PrivEscalation { to: Priv::Admin }],
            base_success: 0.60,
            stealth_base: 0.4,
            data_sources: vec!["Process Creation", "Exploit Guard"],
        },
        TechniqueSpec {
            id: "T1548.002",
            name: "Abuse Elevation Control: Bypass UAC",
            tactic: T::PrivilegeEscalation,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeUser],
            effects: vec![E::PrivEscalation { to: Priv::Admin }],
            base_success: 0.65,
            stealth_base: 0.55,
            data_sources: vec!["Process Creation", "Windows Registry"],
        },
        TechniqueSpec {
            id: "T1134",
            name: "Access Token Manipulation",
            tactic: T::PrivilegeEscalation,
            preconditions: vec![P::PositionOnHost, P::PrivilegeAdmin],
            effects: vec![E::PrivEscalation { to: Priv::System }],
            base_success: 0.75,
            stealth_base: 0.6,
            data_sources: vec!["API Monitoring", "Access Token"],
        },
        // ── Defense Evasion ──
        TechniqueSpec {
            id: "T1070.001",
            name: "Indicator Removal: Clear Windows Event Logs",
            tactic: T::DefenseEvasion,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeAdmin],
            effects: vec![E::ReduceDetection(0.3)],
            base_success: 0.90,
            stealth_base: 0.2,
            data_sources: vec!["Log Deletion Event", "Security Log"],
        },
        TechniqueSpec {
            id: "T1027",
            name: "Obfuscated Files or Information",
            tactic: T::DefenseEvasion,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser],
            effects: vec![E::IncreaseStealth(0.15)],
            base_success: 0.85,
            stealth_base: 0.7,
            data_sources: vec!["File Analysis", "Script Execution"],
        },
        TechniqueSpec {
            id: "T1218.011",
            name: "System Binary Proxy Execution: Rundll32",
            tactic: T::DefenseEvasion,
            preconditions: vec![P::PositionOnHost, P::OsWindows, P::PrivilegeUser],
            effects: vec![E::ExecuteCommand, E::IncreaseStealth(0.2)],
            base_success: 0.80,
            stealth_base: 0.75,
            data_sources: vec!["Process Creation", "Module Load"],
        },
        // ── Credential Access ──
        TechniqueSpec {
            id: "T1003.001",
            name: "OS Credential Dumping: LSASS Memory",
            tactic: T::CredentialAccess,
            preconditions: vec![
                P::PositionOnHost,
                P::OsWindows,
                P::PrivilegeAdmin,
                P::HasCredentialCache,
            ],
            effects: vec![E::CredentialHarvest],
            base_success: 0.85,
            stealth_base: 0.3,
            data_sources: vec!["Process Access (LSASS)", "Sensor Health"],
        },
        TechniqueSpec {
            id: "T1003.003",
            name: "OS Credential Dumping: NTDS",
            tactic: T::CredentialAccess,
            preconditions: vec![P::PositionOnHost, P::HostIsDc, P::PrivilegeAdmin],
            effects: vec![E::CredentialHarvest],
            base_success: 0.80,
            stealth_base: 0.2,
            data_sources: vec!["File Access", "Volume Shadow Copy", "Command Line"],
        },
        TechniqueSpec {
            id: "T1558.003",
            name: "Steal or Forge Kerberos Tickets: Kerberoasting",
            tactic: T::CredentialAccess,
            preconditions: vec![P::PositionInternal, P::PrivilegeUser],
            effects: vec![E::CredentialHarvest],
            base_success: 0.75,
            stealth_base: 0.65,
            data_sources: vec!["Kerberos Traffic", "Authentication Log"],
        },
        TechniqueSpec {
            id: "T1110.003",
            name: "Brute Force: Password Spraying",
            tactic: T::CredentialAccess,
            preconditions: vec![],
            effects: vec![E::CredentialHarvest],
            base_success: 0.20,
            stealth_base: 0.4,
            data_sources: vec!["Authentication Log", "Account Lockout"],
        },
        // ── Discovery ──
        TechniqueSpec {
            id: "T1018",
            name: "Remote System Discovery",
            tactic: T::Discovery,
            preconditions: vec![P::PositionInternal, P::PrivilegeUser],
            effects: vec![E::DiscoverHosts],
            base_success: 0.95,
            stealth_base: 0.7,
            data_sources: vec!["Network Traffic", "Process Creation"],
        },
        TechniqueSpec {
            id: "T1083",
            name: "File and Directory Discovery",
            tactic: T::Discovery,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser],
            effects: vec![E::StageData],
            base_success: 0.95,
            stealth_base: 0.85,
            data_sources: vec!["Process Creation", "Command Line"],
        },
        TechniqueSpec {
            id: "T1087.002",
            name: "Account Discovery: Domain Account",
            tactic: T::Discovery,
            preconditions: vec![P::PositionInternal, P::PrivilegeUser],
            effects: vec![E::DiscoverHosts],
            base_success: 0.90,
            stealth_base: 0.7,
            data_sources: vec!["LDAP Query", "Authentication Log"],
        },
        TechniqueSpec {
            id: "T1046",
            name: "Network Service Discovery",
            tactic: T::Discovery,
            preconditions: vec![P::PositionInternal, P::PrivilegeUser],
            effects: vec![E::DiscoverHosts],
            base_success: 0.90,
            stealth_base: 0.6,
            data_sources: vec!["Network Traffic", "Netflow"],
        },
        // ── Lateral Movement ──
        TechniqueSpec {
            id: "T1021.001",
            name: "Remote Services: Remote Desktop Protocol",
            tactic: T::LateralMovement,
            preconditions: vec![
                P::ServiceRunning("rdp"),
                P::CredentialAvailable,
                P::HostNotIsolated,
            ],
            effects: vec![E::LateralMove],
            base_success: 0.85,
            stealth_base: 0.6,
            data_sources: vec!["Network Connection", "Authentication Log", "RDP Log"],
        },
        TechniqueSpec {
            id: "T1021.002",
            name: "Remote Services: SMB/Windows Admin Shares",
            tactic: T::LateralMovement,
            preconditions: vec![
                P::ServiceRunning("smb"),
                P::CredentialAvailable,
                P::HostNotIsolated,
            ],
            effects: vec![E::LateralMove],
            base_success: 0.80,
            stealth_base: 0.5,
            data_sources: vec!["Network Share Access", "SMB Traffic", "Authentication Log"],
        },
        TechniqueSpec {
            id: "T1021.004",
            name: "Remote Services: SSH",
            tactic: T::LateralMovement,
            preconditions: vec![
                P::ServiceRunning("ssh"),
                P::CredentialAvailable,
                P::HostNotIsolated,
            ],
            effects: vec![E::LateralMove],
            base_success: 0.85,
            stealth_base: 0.65,
            data_sources: vec!["SSH Log", "Authentication Log", "Network Connection"],
        },
        TechniqueSpec {
            id: "T1570",
            name: "Lateral Tool Transfer",
            tactic: T::LateralMovement,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser, P::HostNotIsolated],
            effects: vec![E::ExecuteCommand],
            base_success: 0.75,
            stealth_base: 0.5,
            data_sources: vec!["Network Traffic", "File Creation"],
        },
        TechniqueSpec {
            id: "T1210",
            name: "Exploitation of Remote Services",
            tactic: T::LateralMovement,
            preconditions: vec![P::VulnerabilityExists, P::HostNotIsolated],
            effects: vec![E::LateralMove],
            base_success: 0.55,
            stealth_base: 0.35,
            data_sources: vec!["Network Traffic", "IDS/IPS", "Application Log"],
        },
        // ── Collection ──
        TechniqueSpec {
            id: "T1005",
            name: "Data from Local System",
            tactic: T::Collection,
            preconditions: vec![P::PositionOnHost, P::PrivilegeUser],
            effects: vec![E::StageData],
            base_success: 0.90,
            stealth_base: 0.75,
            data_sources: vec!["File Access", "Process Creation"],
        },
        TechniqueSpec {
            id: "T1039",
            name: "Data from Network Shared Drive",
            tactic: T::Collection,
            preconditions: vec![
                P::PositionInternal,
                P::PrivilegeUser,
                P::ServiceRunning("smb"),
            ],
            effects: vec![E::StageData],
            base_success: 0.85,
            stealth_base: 0.7,
            data_sources: vec!["Network Share Access", "File Access"],
        },
        // ── Exfiltration ──
        TechniqueSpec {
            id: "T1048",
            name: "Exfiltration Over Alternative Protocol",
            tactic: T::Exfiltration,
            preconditions: vec![P::PositionOnHost, P::DataStaged, P::PrivilegeUser],
            effects: vec![E::Exfil],
            base_success: 0.75,
            stealth_base: 0.5,
            data_sources: vec!["Network Traffic", "DNS", "Firewall Log"],
        },
        TechniqueSpec {
            id: "T1041",
            name: "Exfiltration Over C2 Channel",
            tactic: T::Exfiltration,
            preconditions: vec![P::PositionOnHost, P::DataStaged, P::PrivilegeUser],
            effects: vec![E::Exfil],
            base_success: 0.80,
            stealth_base: 0.6,
            data_sources: vec!["Network Traffic", "Proxy Log"],
        },
        TechniqueSpec {
            id: "T1567.002",
            name: "Exfiltration Over Web Service: Cloud Storage",
            tactic: T::Exfiltration,
            preconditions: vec![P::PositionOnHost, P::DataStaged, P::PrivilegeUser],
            effects: vec![E::Exfil],
            base_success: 0.85,
            stealth_base: 0.7,
            data_sources: vec!["Cloud API Log", "Network Traffic", "Web Proxy"],
        },
        // ── Impact ──
        TechniqueSpec {
            id: "T1486",
            name: "Data Encrypted for Impact",
            tactic: T::Impact,
            preconditions: vec![P::PositionOnHost, P::PrivilegeAdmin],
            effects: vec![E::Impact],
            base_success: 0.90,
            stealth_base: 0.1,
            data_sources: vec!["File Modification", "Service Stop"],
        },
        TechniqueSpec {
            id: "T1489",
            name: "Service Stop",
            tactic: T::Impact,
            preconditions: vec![P::PositionOnHost, P::PrivilegeAdmin],
            effects: vec![E::Impact],
            base_success: 0.95,
            stealth_base: 0.2,
            data_sources: vec!["Service Activity", "Process Termination"],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_size_and_tactic_coverage() {
        let cat = catalog();
        assert_eq!(cat.len(), 38);

        for tactic in Tactic::ALL {
            assert!(
                !cat.by_tactic(tactic).is_empty(),
                "tactic {tactic:?} has no techniques"
            );
        }
    }

    #[test]
    fn test_catalog_is_total_over_its_ids() {
        let cat = catalog();
        for id in cat.ids() {
            let spec = cat.get(id).unwrap();
            assert_eq!(spec.id, id);
            assert!((0.0..=1.0).contains(&spec.base_success));
            assert!((0.0..=1.0).contains(&spec.stealth_base));
            assert!(!spec.data_sources.is_empty());
        }
    }

    #[test]
    fn test_initial_access_subset() {
        let cat = catalog();
        let ia = cat.initial_access();
        assert_eq!(ia.len(), 5);
        assert!(ia.iter().all(|t| t.tactic == Tactic::InitialAccess));
    }

    #[test]
    fn test_ordinals_are_stable_and_dense() {
        let cat = catalog();
        let ids = cat.ids();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(cat.ordinal(id), Some(i));
        }
        assert!(cat.ordinal("T9999").is_none());
    }

    #[test]
    fn test_unknown_id_misses() {
        assert!(catalog().get("T0000").is_none());
        assert!(!catalog().contains("T0000"));
    }
}
