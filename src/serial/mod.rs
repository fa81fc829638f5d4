//! Serial port access for the tally panel
//!
//! This module provides functionality for:
//! - Listing available serial ports (USB-to-serial adapters)
//! - Opening the write-only connection the driver streams commands over

pub mod port;

pub use port::{PortConfig, SerialConnection};
