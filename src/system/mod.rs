//! Clock and host readouts used by telemetry.
//!
//! Readings come from procfs/sysfs on the board. Anything that cannot be
//! read falls back to a neutral value so a status message still goes out.

use std::{
    cell::Cell,
    net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket},
    path::PathBuf,
    rc::Rc,
    time::Instant,
};

/// Monotonic milliseconds since boot
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Counts from its creation. Create it first thing at startup so readings
/// are time since boot.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle and give the other to the device.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Point-in-time readouts for discovery and status messages
pub trait SystemProbe {
    /// Received signal strength in dBm
    fn signal_strength(&self) -> i32;
    /// Free memory in bytes
    fn free_memory(&self) -> u64;
    fn ip_address(&self) -> String;
    fn mac_address(&self) -> String;
}

pub const UNKNOWN_MAC: &str = "00:00:00:00:00:00";
pub const UNKNOWN_IP: &str = "0.0.0.0";

pub struct HostProbe {
    interface: String,
    route_target: String,
    proc_root: PathBuf,
    sysfs_root: PathBuf,
}

impl HostProbe {
    /// `route_target` is any `host:port` reachable through the interface. It
    /// is used to find which local address would be used to reach it.
    pub fn new(interface: &str, route_target: &str) -> Self {
        Self {
            interface: interface.to_string(),
            route_target: route_target.to_string(),
            proc_root: PathBuf::from("/proc"),
            sysfs_root: PathBuf::from("/sys/class/net"),
        }
    }

    pub fn with_roots(mut self, proc_root: PathBuf, sysfs_root: PathBuf) -> Self {
        self.proc_root = proc_root;
        self.sysfs_root = sysfs_root;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// True when the kernel reports the interface as up
    pub fn link_up(&self) -> bool {
        std::fs::read_to_string(self.sysfs_root.join(&self.interface).join("operstate"))
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        route_local_ip(&self.route_target).ok()
    }
}

impl SystemProbe for HostProbe {
    fn signal_strength(&self) -> i32 {
        std::fs::read_to_string(self.proc_root.join("net/wireless"))
            .ok()
            .and_then(|contents| parse_wireless_level(&contents, &self.interface))
            .unwrap_or(0)
    }

    fn free_memory(&self) -> u64 {
        std::fs::read_to_string(self.proc_root.join("meminfo"))
            .ok()
            .and_then(|contents| parse_mem_available(&contents))
            .unwrap_or(0)
    }

    fn ip_address(&self) -> String {
        self.local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }

    fn mac_address(&self) -> String {
        std::fs::read_to_string(self.sysfs_root.join(&self.interface).join("address"))
            .map(|mac| mac.trim().to_uppercase())
            .unwrap_or_else(|_| UNKNOWN_MAC.to_string())
    }
}

/// Local address the kernel would pick to reach `target`. Connecting a UDP
/// socket only selects a route; nothing is sent.
pub fn route_local_ip(target: &str) -> std::io::Result<IpAddr> {
    let target: SocketAddr = target.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "target did not resolve")
    })?;
    let bind: SocketAddr = if target.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no routable local address",
        ));
    }
    Ok(ip)
}

/// Signal level for `interface` from `/proc/net/wireless`.
///
/// ```text
/// Inter-| sta-|   Quality        |   Discarded packets
///  face | tus | link level noise |  nwid  crypt   frag
///  wlan0: 0000   54.  -56.  -256        0      0      0
/// ```
pub fn parse_wireless_level(contents: &str, interface: &str) -> Option<i32> {
    contents.lines().skip(2).find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        let level = rest.split_whitespace().nth(2)?;
        level.trim_end_matches('.').parse::<f32>().ok().map(|l| l as i32)
    })
}

/// `MemAvailable` from `/proc/meminfo`, in bytes
pub fn parse_mem_available(contents: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let value = line.strip_prefix("MemAvailable:")?;
        let kib = value.trim().trim_end_matches("kB").trim();
        kib.parse::<u64>().ok().map(|kib| kib * 1024)
    })
}
