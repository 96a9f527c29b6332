//! Linux `charlcd` input language.
//!
//! Text bytes are printed at the cursor. Control is done with form feed and
//! `ESC [ L` sequences, interpreted by the kernel driver.

use std::fmt::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank the screen and return the cursor home.
    Clear,
    Home,
    Goto { col: usize, row: usize },
    Display(bool),
    Cursor(bool),
    Blink(bool),
    Backlight(bool),
    Shift(Direction),
    /// Defines CGRAM character `slot` (0-7) from eight 5-bit rows.
    Glyph { slot: u8, rows: [u8; 8] },
    Text(String),
    /// Prints the character stored in `slot`.
    Custom(u8),
}

impl Command {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::Clear => vec![0x0C],
            Command::Home => b"\x1b[H".to_vec(),
            Command::Goto { col, row } => format!("\x1b[Lx{col}y{row};").into_bytes(),
            Command::Display(on) => lcd_escape(if *on { 'D' } else { 'd' }),
            Command::Cursor(on) => lcd_escape(if *on { 'C' } else { 'c' }),
            Command::Blink(on) => lcd_escape(if *on { 'B' } else { 'b' }),
            Command::Backlight(on) => lcd_escape(if *on { '+' } else { '-' }),
            Command::Shift(Direction::Left) => lcd_escape('L'),
            Command::Shift(Direction::Right) => lcd_escape('R'),
            Command::Glyph { slot, rows } => {
                let mut seq = format!("\x1b[LG{}", slot & 0x07);
                for row in rows {
                    let _ = write!(seq, "{:02x}", row & 0x1F);
                }
                seq.push(';');
                seq.into_bytes()
            }
            Command::Text(text) => encode(text),
            Command::Custom(slot) => vec![slot & 0x07],
        }
    }
}

fn lcd_escape(code: char) -> Vec<u8> {
    format!("\x1b[L{code}").into_bytes()
}

/// Maps text onto the controller's ASCII range. Anything else, control
/// characters included, prints as `?`.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escape_sequences() {
        assert_eq!(Command::Clear.to_bytes(), vec![0x0C]);
        assert_eq!(Command::Goto { col: 3, row: 1 }.to_bytes(), b"\x1b[Lx3y1;".to_vec());
        assert_eq!(Command::Backlight(false).to_bytes(), b"\x1b[L-".to_vec());
        assert_eq!(Command::Display(true).to_bytes(), b"\x1b[LD".to_vec());
        assert_eq!(Command::Shift(Direction::Right).to_bytes(), b"\x1b[LR".to_vec());
    }

    #[test]
    fn glyph_is_hex_encoded() {
        let cmd = Command::Glyph {
            slot: 2,
            rows: [0x00, 0x0A, 0x1F, 0x1F, 0x0E, 0x04, 0x00, 0x00],
        };
        assert_eq!(cmd.to_bytes(), b"\x1b[LG2000a1f1f0e040000;".to_vec());
    }

    #[test]
    fn text_cannot_smuggle_escapes() {
        assert_eq!(
            Command::Text("a\x1b[LIé".into()).to_bytes(),
            b"a?[LI?".to_vec()
        );
        assert_eq!(Command::Custom(5).to_bytes(), vec![5]);
    }
}
