pub mod command;
pub mod config;
pub mod connectivity;
pub mod device;
pub mod logging;
pub mod relay;
pub mod system;
pub mod telemetry;
pub mod web;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::{
        command::*, config::*, connectivity::*, device::*, relay::*, system::*, telemetry::*,
        web::*,
    };
}
