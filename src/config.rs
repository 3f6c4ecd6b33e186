use std::path::Path;

use anyhow::{bail, Context, Error};
use log::info;
use pi_pinout::{GpioPin, PhysicalPin, WiringPiPin};
use serde::{Deserialize, Serialize};

/// Default location of the override file, relative to the working directory
pub const CONFIG_PATH: &str = "plug.ron";
/// Environment variable that points at a different config file
pub const CONFIG_ENV: &str = "BREEZE_PLUG_CONFIG";
/// Highest line on the 40-pin header
const MAX_BCM: u8 = 27;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Identifier used for the client id and every topic
    pub device_id: String,
    /// Hardware type reported in discovery
    pub hardware_type: String,
    pub broker: Broker,
    pub relay: Relay,
    pub http_port: u16,
    /// Network interface the plug is joined through
    pub interface: String,
    /// Name of the setup access point shown when no network is joined
    pub portal_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Relay {
    pub pin: Pin,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Pin {
    /// Position on the 40-pin header
    Physical(PhysicalPin),
    /// Broadcom GPIO number
    Gpio(GpioPin),
    WiringPi(WiringPiPin),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "esp8266-001".to_string(),
            hardware_type: "ESP8266".to_string(),
            broker: Broker::default(),
            relay: Relay::default(),
            http_port: 80,
            interface: "wlan0".to_string(),
            portal_name: "SmartPlug-Setup".to_string(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            host: "51.83.98.100".to_string(),
            port: 1883,
            keep_alive_secs: 15,
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            pin: Pin::Gpio(GpioPin(4)),
        }
    }
}

impl Config {
    /// Load the config from `$BREEZE_PLUG_CONFIG` or `plug.ron`. A missing
    /// file is not an error; the built-in defaults are used instead.
    pub fn load() -> Result<Config, Error> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_PATH.to_string());
        Self::load_or_default(path)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Config, Error> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "config: {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Config::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            ron::from_str(&config).with_context(|| format!("parsing {}", path.display()))?;
        if config.device_id.is_empty() {
            bail!("device_id must not be empty");
        }
        info!("config: loaded {}", path.display());
        Ok(config)
    }
}

impl Pin {
    /// Resolve to the Broadcom GPIO number used by the driver
    pub fn bcm(&self) -> Result<u8, Error> {
        let gpio: Option<GpioPin> = match *self {
            Pin::Gpio(pin) => Some(pin),
            // pi_pinout panics on header positions with no GPIO line
            Pin::Physical(pin) => std::panic::catch_unwind(|| GpioPin::from(pin)).ok(),
            Pin::WiringPi(pin) => std::panic::catch_unwind(|| GpioPin::from(pin)).ok(),
        };
        gpio.map(|pin| pin.0)
            .filter(|bcm| *bcm <= MAX_BCM)
            .with_context(|| format!("{:?} is not a usable GPIO line", self))
    }
}
