//! Built-in bitmaps and animations.

use std::{
    io,
    time::{Duration, Instant},
};

use rand::Rng;

use super::frame::Frame;
use crate::effect::StopSignal;

pub const NEUTRAL: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x81, 0xBD, 0x42, 0x3C]);
pub const HAPPY: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0xA5, 0x99, 0x42, 0x3C]);
pub const SAD: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x99, 0xA5, 0x42, 0x3C]);
pub const SURPRISED: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x99, 0x99, 0x42, 0x3C]);
pub const ANGRY: Frame = Frame::from_rows([0x3C, 0x5A, 0xA5, 0x81, 0x99, 0xA5, 0x42, 0x3C]);
pub const SLEEPY: Frame = Frame::from_rows([0x3C, 0x42, 0x81, 0xE7, 0x81, 0xBD, 0x42, 0x3C]);
pub const WINK: Frame = Frame::from_rows([0x3C, 0x42, 0xA1, 0x87, 0xA5, 0x99, 0x42, 0x3C]);
pub const LOVE: Frame = Frame::from_rows([0x66, 0xFF, 0xFF, 0xFF, 0x7E, 0x3C, 0x18, 0x00]);
pub const CONFUSED: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x8D, 0xB1, 0x42, 0x3C]);

pub const BLINK: Frame = Frame::from_rows([0x3C, 0x42, 0x81, 0xE7, 0xA5, 0x99, 0x42, 0x3C]);
pub const TALK_OPEN: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x99, 0x99, 0x42, 0x3C]);
pub const TALK_CLOSED: Frame = Frame::from_rows([0x3C, 0x42, 0xA5, 0x81, 0x81, 0xBD, 0x42, 0x3C]);

const EXPRESSIONS: [(&str, Frame); 9] = [
    ("neutral", NEUTRAL),
    ("happy", HAPPY),
    ("sad", SAD),
    ("surprised", SURPRISED),
    ("angry", ANGRY),
    ("sleepy", SLEEPY),
    ("wink", WINK),
    ("love", LOVE),
    ("confused", CONFUSED),
];

const SNORE: [&str; 3] = ["###", "..#", "###"];

pub fn expression(name: &str) -> Option<Frame> {
    EXPRESSIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|&(_, frame)| frame)
}

pub fn expression_names() -> impl Iterator<Item = &'static str> {
    EXPRESSIONS.iter().map(|&(name, _)| name)
}

/// Looping animations the face can play in the background.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Animation {
    Thinking,
    Speaking,
    Listening,
    Sleeping,
    IdleBlink,
}

impl Animation {
    pub const ALL: [Animation; 5] = [
        Animation::Thinking,
        Animation::Speaking,
        Animation::Listening,
        Animation::Sleeping,
        Animation::IdleBlink,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Animation::Thinking => "thinking",
            Animation::Speaking => "speaking",
            Animation::Listening => "listening",
            Animation::Sleeping => "sleeping",
            Animation::IdleBlink => "idle_blink",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Plays until stopped or until `clock` runs out. Frames go to `show`.
    pub fn play(self, clock: &Clock, show: &mut dyn FnMut(Frame) -> io::Result<()>) -> io::Result<()> {
        let mut rng = rand::rng();

        while clock.running() {
            match self {
                Animation::Thinking => {
                    let spokes: [&[(i32, i32, i32, i32)]; 4] = [
                        &[(3, 1, 3, 6), (4, 1, 4, 6)],
                        &[(1, 6, 6, 1)],
                        &[(1, 3, 6, 3), (1, 4, 6, 4)],
                        &[(1, 1, 6, 6)],
                    ];
                    for lines in spokes {
                        let mut frame = Frame::BLANK;
                        for &(x0, y0, x1, y1) in lines {
                            frame.line(x0, y0, x1, y1);
                        }
                        show(frame)?;
                        if !clock.hold(Duration::from_millis(100)) {
                            return Ok(());
                        }
                    }
                }
                Animation::Speaking => {
                    show(TALK_OPEN)?;
                    if !clock.hold(Duration::from_millis(rng.random_range(100..=300))) {
                        return Ok(());
                    }
                    show(TALK_CLOSED)?;
                    if !clock.hold(Duration::from_millis(rng.random_range(50..=200))) {
                        return Ok(());
                    }
                }
                Animation::Listening => {
                    for size in [1, 2, 3, 3, 2, 1] {
                        let mut frame = Frame::BLANK;
                        frame.ellipse(3 - size, 3 - size, 4 + size, 4 + size, false);
                        show(frame)?;
                        if !clock.hold(Duration::from_millis(150)) {
                            return Ok(());
                        }
                    }
                }
                Animation::Sleeping => {
                    for (x, y) in [(6, 6), (4, 4), (2, 2), (1, 0)] {
                        let mut frame = Frame::BLANK;
                        frame.stamp(&SNORE, x, y);
                        show(frame)?;
                        if !clock.hold(Duration::from_millis(400)) {
                            return Ok(());
                        }
                    }
                }
                Animation::IdleBlink => {
                    show(NEUTRAL)?;
                    if !clock.hold(Duration::from_millis(rng.random_range(2000..=5000))) {
                        return Ok(());
                    }
                    show(BLINK)?;
                    if !clock.hold(Duration::from_millis(150)) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Shows each frame for its own duration, once or forever.
pub fn play_sequence(
    frames: &[(Frame, Duration)],
    repeat: bool,
    clock: &Clock,
    show: &mut dyn FnMut(Frame) -> io::Result<()>,
) -> io::Result<()> {
    loop {
        for &(frame, hold) in frames {
            show(frame)?;
            if !clock.hold(hold) {
                return Ok(());
            }
        }
        if !repeat {
            return Ok(());
        }
    }
}

/// Stop signal plus an optional deadline.
pub struct Clock {
    stop: StopSignal,
    deadline: Option<Instant>,
}

impl Clock {
    /// `duration` of zero means no deadline.
    pub fn new(stop: StopSignal, duration: Duration) -> Self {
        Self {
            stop,
            deadline: (!duration.is_zero()).then(|| Instant::now() + duration),
        }
    }

    pub fn running(&self) -> bool {
        !self.stop.is_raised() && self.deadline.is_none_or(|d| Instant::now() < d)
    }

    /// Waits `hold`, cut short by the deadline or the stop signal. Returns
    /// whether playback should continue.
    pub fn hold(&self, hold: Duration) -> bool {
        let hold = match self.deadline {
            Some(deadline) => hold.min(deadline.saturating_duration_since(Instant::now())),
            None => hold,
        };
        !self.stop.wait_timeout(hold) && self.running()
    }
}
