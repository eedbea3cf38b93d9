//! Host facts for `/api/system-info`: recomputed on every call, never cached.

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::gate::ApiError;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Wire shape of `/api/system-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub hostname: String,
    /// `std::env::consts::OS` (e.g. "linux", "macos").
    pub platform: String,
    /// `std::env::consts::ARCH` (e.g. "x86_64", "aarch64").
    pub arch: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    /// e.g. "15.54 GB"
    pub total_memory: String,
    pub free_memory: String,
    /// e.g. "26 hours"
    pub uptime: String,
}

/// Raw readings before formatting.
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub hostname: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
    pub free_memory_bytes: u64,
    pub uptime_secs: u64,
}

/// Query the OS. Blocking; call from `spawn_blocking` in async code.
pub fn read_host_facts() -> HostFacts {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let cpu_model = system
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty());

    HostFacts {
        hostname: System::host_name(),
        cpu_model,
        cpu_cores: system.cpus().len(),
        total_memory_bytes: system.total_memory(),
        free_memory_bytes: system.available_memory(),
        uptime_secs: System::uptime(),
    }
}

/// Two decimals, gibibytes.
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GIB)
}

/// Whole hours, rounded down.
pub fn format_uptime(secs: u64) -> String {
    format!("{} hours", secs / 3600)
}

impl SystemSnapshot {
    pub fn from_facts(facts: HostFacts) -> Result<Self, ApiError> {
        let hostname = facts
            .hostname
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ApiError::Server("failed to read host name".to_string()))?;
        Ok(Self {
            hostname,
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_model: facts.cpu_model.unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: facts.cpu_cores,
            total_memory: format_gib(facts.total_memory_bytes),
            free_memory: format_gib(facts.free_memory_bytes),
            uptime: format_uptime(facts.uptime_secs),
        })
    }
}

/// Read and format a fresh snapshot.
pub fn snapshot() -> Result<SystemSnapshot, ApiError> {
    SystemSnapshot::from_facts(read_host_facts())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> HostFacts {
        HostFacts {
            hostname: Some("build-01".to_string()),
            cpu_model: Some("AMD Ryzen 9 7950X 16-Core Processor".to_string()),
            cpu_cores: 32,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            free_memory_bytes: 5_905_580_032,
            uptime_secs: 7 * 3600 + 3599,
        }
    }

    #[test]
    fn formats_memory_and_uptime() {
        assert_eq!(format_gib(16 * 1024 * 1024 * 1024), "16.00 GB");
        assert_eq!(format_gib(5_905_580_032), "5.50 GB");
        assert_eq!(format_gib(0), "0.00 GB");
        assert_eq!(format_uptime(3599), "0 hours");
        assert_eq!(format_uptime(7 * 3600 + 3599), "7 hours");
    }

    #[test]
    fn snapshot_from_facts() {
        let s = SystemSnapshot::from_facts(facts()).unwrap();
        assert_eq!(s.hostname, "build-01");
        assert_eq!(s.cpu_model, "AMD Ryzen 9 7950X 16-Core Processor");
        assert_eq!(s.cpu_cores, 32);
        assert_eq!(s.total_memory, "16.00 GB");
        assert_eq!(s.free_memory, "5.50 GB");
        assert_eq!(s.uptime, "7 hours");
        assert_eq!(s.platform, std::env::consts::OS);
        assert_eq!(s.arch, std::env::consts::ARCH);
    }

    #[test]
    fn missing_cpu_model_is_unknown() {
        let mut f = facts();
        f.cpu_model = None;
        assert_eq!(SystemSnapshot::from_facts(f).unwrap().cpu_model, "Unknown");
    }

    #[test]
    fn missing_hostname_is_server_error() {
        let mut f = facts();
        f.hostname = None;
        let err = SystemSnapshot::from_facts(f).unwrap_err();
        assert!(matches!(err, ApiError::Server(_)));
    }

    #[test]
    fn wire_keys_are_camel_case() {
        let json = serde_json::to_value(SystemSnapshot::from_facts(facts()).unwrap()).unwrap();
        for key in [
            "hostname",
            "platform",
            "arch",
            "cpuModel",
            "cpuCores",
            "totalMemory",
            "freeMemory",
            "uptime",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn stable_fields_do_not_change_between_reads() {
        let a = read_host_facts();
        let b = read_host_facts();
        assert_eq!(a.hostname, b.hostname);
        assert_eq!(a.cpu_model, b.cpu_model);
        assert_eq!(a.cpu_cores, b.cpu_cores);
    }
}
