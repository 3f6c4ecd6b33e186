use anyhow::Error;
use common::RelayState;
use log::info;

#[cfg(feature = "pi")]
use rppal::gpio::Gpio;

use crate::config::Pin;

/// Physical level on the relay control line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// The relay board is active-low: pulling the line low energizes the coil
    pub fn for_state(on: bool) -> Self {
        if on {
            Level::Low
        } else {
            Level::High
        }
    }
}

/// A single digital output line
pub trait OutputPin {
    fn drive(&mut self, level: Level);
}

#[cfg(feature = "pi")]
pub struct GpioOutput {
    pin: rppal::gpio::OutputPin,
}

#[cfg(feature = "pi")]
impl GpioOutput {
    pub fn init(pin: &Pin) -> Result<Self, Error> {
        let bcm = pin.bcm()?;
        info!("relay: initializing on GPIO {}", bcm);
        let pin = Gpio::new()?.get(bcm)?.into_output();
        Ok(Self { pin })
    }
}

#[cfg(feature = "pi")]
impl OutputPin for GpioOutput {
    fn drive(&mut self, level: Level) {
        match level {
            Level::Low => self.pin.set_low(),
            Level::High => self.pin.set_high(),
        }
    }
}

/// Output line with no hardware behind it. Remembers every level it was
/// driven to.
#[derive(Clone, Debug, Default)]
pub struct SimulatedOutput {
    history: Vec<Level>,
}

impl SimulatedOutput {
    pub fn level(&self) -> Option<Level> {
        self.history.last().copied()
    }

    pub fn history(&self) -> &[Level] {
        &self.history
    }
}

impl OutputPin for SimulatedOutput {
    fn drive(&mut self, level: Level) {
        self.history.push(level);
    }
}

#[cfg(feature = "pi")]
pub type PlatformOutput = GpioOutput;
#[cfg(not(feature = "pi"))]
pub type PlatformOutput = SimulatedOutput;

/// Open the output line the relay is wired to
#[cfg(feature = "pi")]
pub fn open(pin: &Pin) -> Result<PlatformOutput, Error> {
    GpioOutput::init(pin)
}

#[cfg(not(feature = "pi"))]
pub fn open(pin: &Pin) -> Result<PlatformOutput, Error> {
    let bcm = pin.bcm()?;
    log::warn!(
        "relay: built without the `pi` feature, GPIO {} is simulated",
        bcm
    );
    Ok(SimulatedOutput::default())
}

/// Owns the relay line and the logical state it encodes
pub struct RelayDriver<O> {
    pin: O,
    on: bool,
}

impl<O: OutputPin> RelayDriver<O> {
    /// Take over the line and switch the relay off
    pub fn new(mut pin: O) -> Self {
        pin.drive(Level::for_state(false));
        Self { pin, on: false }
    }

    /// Drive the line for `on` and record it. Applied every time, even when
    /// the state does not change.
    pub fn apply(&mut self, on: bool) {
        self.pin.drive(Level::for_state(on));
        self.on = on;
        info!("relay: Relay {}", if on { "ON" } else { "OFF" });
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn state(&self) -> RelayState {
        RelayState::from(self.on)
    }

    pub fn pin(&self) -> &O {
        &self.pin
    }
}
