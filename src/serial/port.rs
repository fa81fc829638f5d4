//! Serial port configuration and connection management
//!
//! Handles USB serial port discovery and the write-only connection used to
//! drive the tally panel.

use anyhow::{Context, Result};
use colored::Colorize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Write};
use std::time::Duration;

/// Baud rate the tally panel listens on
pub const DEFAULT_BAUD: u32 = 115200;

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, /dev/cu.usbmodemfa131)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// I/O timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from("/dev/ttyUSB0"),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(100),
        }
    }
}

impl PortConfig {
    /// Create a new 8-N-1 configuration at the default baud rate
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Wrapper around an open serial port
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(config: &PortConfig) -> serialport::Result<Self> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()?;

        Ok(Self { port })
    }

    /// Write bytes with a single write call, returning how many were accepted
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write(data)
    }

    /// Flush output buffer
    pub fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
            serialport::SerialPortType::UsbPort(info) => (
                PortType::UsbSerial,
                info.manufacturer,
                info.product,
                info.serial_number,
                Some(info.vid),
                Some(info.pid),
            ),
            serialport::SerialPortType::PciPort => {
                (PortType::PciSerial, None, None, None, None, None)
            }
            serialport::SerialPortType::BluetoothPort => {
                (PortType::Bluetooth, None, None, None, None, None)
            }
            serialport::SerialPortType::Unknown => {
                (PortType::Unknown, None, None, None, None, None)
            }
        };

        PortInfo {
            path: p.port_name,
            port_type,
            manufacturer,
            product,
            serial_number,
            vid,
            pid,
        }
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;

    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// USB serial adapters only, in enumeration order
pub fn detect_usb_ports() -> Result<Vec<PortInfo>> {
    Ok(usb_only(list_ports()?))
}

fn usb_only(ports: Vec<PortInfo>) -> Vec<PortInfo> {
    ports
        .into_iter()
        .filter(|p| p.port_type == PortType::UsbSerial)
        .collect()
}

/// Print formatted list of available serial ports
pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect the tally panel's USB cable");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM* /dev/cu.*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let Some(ref sn) = port.serial_number {
            println!("  Serial: {}", sn);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: tally-cycle run -p <PORT> to start cycling".yellow()
    );

    Ok(())
}
