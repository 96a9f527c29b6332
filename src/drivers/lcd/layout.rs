//! Text placement helpers. All widths are in characters.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub const NAMES: [&'static str; 3] = ["left", "center", "right"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "left" => Some(Align::Left),
            "center" => Some(Align::Center),
            "right" => Some(Align::Right),
            _ => None,
        }
    }
}

pub fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Truncates `text` to `width` and pads it to exactly `width`.
pub fn align(text: &str, width: usize, align: Align) -> String {
    let text = truncate(text, width);
    let pad = width - text.chars().count();
    let (left, right) = match align {
        Align::Left => (0, pad),
        Align::Right => (pad, 0),
        Align::Center => (pad / 2, pad - pad / 2),
    };
    format!("{}{text}{}", " ".repeat(left), " ".repeat(right))
}

/// `[####------]` spanning `width` characters.
pub fn progress_bar(percentage: u8, width: usize) -> String {
    let inner = width.saturating_sub(2);
    let filled = inner * usize::from(percentage.min(100)) / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(inner - filled))
}

/// Successive `width`-character views of `text` sliding in from the right
/// and out to the left.
pub fn scroll_windows(text: &str, width: usize) -> impl Iterator<Item = String> {
    let padded: Vec<char> = std::iter::repeat_n(' ', width)
        .chain(text.chars())
        .chain(std::iter::repeat_n(' ', width))
        .collect();
    let steps = padded.len() - width + 1;
    (0..steps).map(move |i| padded[i..i + width].iter().collect())
}

/// Replaces the characters of `line` starting at `col`, padding with spaces.
pub fn overlay(line: &str, col: usize, text: &str, width: usize) -> String {
    let mut chars: Vec<char> = line.chars().collect();
    if chars.len() < col {
        chars.resize(col, ' ');
    }
    for (i, c) in text.chars().enumerate() {
        let at = col + i;
        if at >= width {
            break;
        }
        if at < chars.len() {
            chars[at] = c;
        } else {
            chars.push(c);
        }
    }
    chars.into_iter().collect()
}
