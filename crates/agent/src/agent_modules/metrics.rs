use chrono::{DateTime, Utc};
use fleetwatch_common::wire::{DiskStats, MemoryStats, MetricsPayload, NetworkStats, SystemInfo};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use sysinfo::{CpuRefreshKind, DiskKind, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

const EXCLUDED_FS_TYPES: &[&str] = &["squashfs", "overlay", "devtmpfs", "tmpfs"];

pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Disk usage of `/` when it is mounted, otherwise summed over physical disks.
fn disk_stats(disks: &Disks) -> DiskStats {
    let excluded: HashSet<&str> = EXCLUDED_FS_TYPES.iter().copied().collect();
    let usage = |disk: &sysinfo::Disk| {
        let total = disk.total_space();
        (total, total.saturating_sub(disk.available_space()))
    };

    let (total, used) = match disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
    {
        Some(root) => usage(root),
        None => disks
            .list()
            .iter()
            .filter(|d| {
                d.total_space() > 0
                    && matches!(d.kind(), DiskKind::HDD | DiskKind::SSD)
                    && !excluded.contains(d.file_system().to_string_lossy().as_ref())
            })
            .map(usage)
            .fold((0, 0), |(t, u), (dt, du)| (t + dt, u + du)),
    };
    DiskStats {
        total,
        used,
        percent: percent(used, total),
    }
}

/// Picks the first global and the first private IPv4 address.
pub fn pick_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> (Option<String>, Option<String>) {
    let mut public = None;
    let mut private = None;
    for addr in addrs {
        let IpAddr::V4(v4) = addr else { continue };
        if v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast() {
            continue;
        }
        if v4.is_private() {
            private.get_or_insert_with(|| v4.to_string());
        } else if !v4.is_documentation() && !v4.is_multicast() {
            public.get_or_insert_with(|| v4.to_string());
        }
    }
    (public, private)
}

pub struct MetricsCollector {
    sys: System,
    disks: Disks,
    networks: Networks,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_list(CpuRefreshKind::everything());
        sys.refresh_memory();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    /// Takes one sample. CPU usage is measured over a short interval so the
    /// first call after start-up is meaningful too.
    pub async fn collect(&mut self) -> MetricsPayload {
        self.sys.refresh_cpu_usage();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let mem_total = self.sys.total_memory();
        let mem_used = self.sys.used_memory();

        let (sent, recv) = self
            .networks
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold((0u64, 0u64), |(s, r), (_, data)| {
                (s + data.total_transmitted(), r + data.total_received())
            });

        let load = System::load_average();
        let payload = MetricsPayload {
            cpu_usage: f64::from(self.sys.global_cpu_usage()),
            memory: MemoryStats {
                total: mem_total,
                used: mem_used,
                percent: percent(mem_used, mem_total),
            },
            disk: disk_stats(&self.disks),
            network: NetworkStats { sent, recv },
            load_average: [load.one, load.five, load.fifteen],
            services: Vec::new(),
            timestamp: Some(Utc::now()),
        };
        debug!(
            cpu = payload.cpu_usage,
            memory = payload.memory.percent,
            disk = payload.disk.percent,
            "Collected metrics sample."
        );
        payload
    }

    pub fn system_info(&mut self) -> SystemInfo {
        self.networks.refresh(true);
        let (public_ip, private_ip) = pick_addresses(
            self.networks
                .iter()
                .flat_map(|(_, data)| data.ip_networks().iter().map(|n| n.addr)),
        );
        let boot_time = i64::try_from(System::boot_time())
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        SystemInfo {
            os_name: System::long_os_version().or_else(System::name),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            architecture: Some(System::cpu_arch()),
            cpu_model: self
                .sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string()),
            cpu_cores: u32::try_from(self.sys.cpus().len()).ok(),
            total_ram: Some(self.sys.total_memory()),
            total_disk: Some(disk_stats(&self.disks).total),
            public_ip,
            private_ip,
            boot_time,
            uptime_seconds: Some(System::uptime()),
        }
    }
}

pub fn host_name() -> String {
    System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[test]
    fn picks_public_and_private_v4() {
        let addrs: Vec<IpAddr> = ["127.0.0.1", "fe80::1", "10.0.0.5", "169.254.1.1", "203.0.113.9", "8.8.4.4", "192.168.1.2"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let (public, private) = pick_addresses(addrs);
        // 203.0.113.0/24 is documentation space.
        assert_eq!(public.as_deref(), Some("8.8.4.4"));
        assert_eq!(private.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn sample_is_in_range() {
        let mut collector = MetricsCollector::new();
        let sample = collector.collect().await;
        assert!((0.0..=100.0).contains(&sample.memory.percent));
        assert!(sample.cpu_usage >= 0.0);
        assert!(sample.timestamp.is_some());
        assert!(sample.services.is_empty());
    }
}
