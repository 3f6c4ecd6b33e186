//! Network join at startup.
//!
//! Joining, credential entry and credential storage belong to the platform.
//! All the plug does is wait, with no timeout, until it has a usable
//! address.

use std::{net::IpAddr, thread, time::Duration};

use anyhow::Error;
use log::{info, warn};

use crate::system::{HostProbe, SystemProbe};

/// Delay between checks while waiting for the network
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ip: IpAddr,
    pub mac: String,
}

pub trait WifiProvisioner {
    /// Block until a network is joined. `portal_name` is the setup access
    /// point users connect to when no credentials are stored.
    fn auto_connect(&mut self, portal_name: &str) -> Result<NetworkInfo, Error>;
}

/// Waits for an already-managed interface (wpa_supplicant, NetworkManager)
/// to come up with a routable address
pub struct InterfaceProvisioner {
    probe: HostProbe,
    poll_interval: Duration,
}

impl InterfaceProvisioner {
    pub fn new(probe: HostProbe) -> Self {
        Self {
            probe,
            poll_interval: JOIN_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn into_probe(self) -> HostProbe {
        self.probe
    }

    fn try_join(&self) -> Option<NetworkInfo> {
        if !self.probe.link_up() {
            return None;
        }
        let ip = self.probe.local_ip()?;
        Some(NetworkInfo {
            ip,
            mac: self.probe.mac_address(),
        })
    }
}

impl WifiProvisioner for InterfaceProvisioner {
    fn auto_connect(&mut self, portal_name: &str) -> Result<NetworkInfo, Error> {
        let mut waited = false;
        loop {
            if let Some(info) = self.try_join() {
                info!("wifi: joined on {} with {}", self.probe.interface(), info.ip);
                return Ok(info);
            }
            if !waited {
                warn!(
                    "wifi: {} has no network; join the '{}' access point to enter credentials",
                    self.probe.interface(),
                    portal_name
                );
                waited = true;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(name: &str, operstate: &str) -> InterfaceProvisioner {
        let root = std::env::temp_dir().join(format!("breeze-wifi-{}-{}", name, std::process::id()));
        let sysfs_root = root.join("net");
        std::fs::create_dir_all(sysfs_root.join("wlan0")).unwrap();
        std::fs::write(sysfs_root.join("wlan0/operstate"), operstate).unwrap();

        let probe = HostProbe::new("wlan0", "127.0.0.1:1883").with_roots(root.join("proc"), sysfs_root);
        InterfaceProvisioner::new(probe).with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_interface_down_is_not_joined() {
        assert_eq!(provisioner("down", "down\n").try_join(), None);
    }

    #[test]
    fn test_loopback_route_is_not_joined() {
        // Link is up, but the only route is loopback
        assert_eq!(provisioner("up", "up\n").try_join(), None);
    }
}
