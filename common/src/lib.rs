//! Wire contract shared between the plug and anything that talks to it:
//! topic layout and the three telemetry payload shapes.
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod telemetry;

pub use telemetry::*;
