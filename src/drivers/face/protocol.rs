//! MAX7219 LED driver register writes.
//!
//! Every command is a 16-bit word, register address first, shifted out in
//! one SPI transfer.

use super::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Pixel bits of one matrix row (0-7).
    Row { row: u8, bits: u8 },
    /// BCD decoding per digit; the matrix wants none.
    DecodeMode(u8),
    /// Duty cycle, 0-15.
    Intensity(u8),
    /// Number of scanned rows minus one.
    ScanLimit(u8),
    Power(bool),
    DisplayTest(bool),
}

impl Command {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Command::Row { row, bits } => [0x01 + (row & 0x07), bits],
            Command::DecodeMode(mask) => [0x09, mask],
            Command::Intensity(level) => [0x0A, level & 0x0F],
            Command::ScanLimit(rows) => [0x0B, rows & 0x07],
            Command::Power(on) => [0x0C, u8::from(on)],
            Command::DisplayTest(on) => [0x0F, u8::from(on)],
        }
    }
}

/// Maps the 0-255 brightness scale onto the 16 intensity steps.
pub fn intensity(brightness: u8) -> u8 {
    brightness >> 4
}

/// Register setup after power-on: all eight rows scanned, raw segments,
/// test mode off, then out of shutdown.
pub fn init_sequence(brightness: u8) -> [Command; 5] {
    [
        Command::DisplayTest(false),
        Command::ScanLimit(7),
        Command::DecodeMode(0),
        Command::Intensity(intensity(brightness)),
        Command::Power(true),
    ]
}

pub fn frame_commands(frame: &Frame) -> impl Iterator<Item = Command> {
    frame
        .rows()
        .into_iter()
        .zip(0u8..)
        .map(|(bits, row)| Command::Row { row, bits })
}
