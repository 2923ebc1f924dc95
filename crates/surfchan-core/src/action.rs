//! Player actions sent to the game each step

use std::fmt;
use std::str::FromStr;

use crate::error::SurfError;

/// A single movement button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Forward,
    Back,
    Left,
    Right,
    Crouch,
    Jump,
}

impl Button {
    /// All buttons in wire order
    pub const ALL: [Button; 6] = [
        Button::Forward,
        Button::Back,
        Button::Left,
        Button::Right,
        Button::Crouch,
        Button::Jump,
    ];

    /// Character used for this button in the step payload
    pub fn code(self) -> char {
        match self {
            Button::Forward => 'f',
            Button::Back => 'b',
            Button::Left => 'l',
            Button::Right => 'r',
            Button::Crouch => 'c',
            Button::Jump => 'j',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of pressed buttons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Buttons(u8);

impl Buttons {
    pub const NONE: Buttons = Buttons(0);

    pub fn with(mut self, button: Button) -> Self {
        self.press(button);
        self
    }

    pub fn press(&mut self, button: Button) {
        self.0 |= button.bit();
    }

    pub fn release(&mut self, button: Button) {
        self.0 &= !button.bit();
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw bit mask, one bit per button in wire order
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn pressed(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(|b| self.is_pressed(*b))
    }
}

impl fmt::Display for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for button in self.pressed() {
            write!(f, "{}", button.code())?;
        }
        Ok(())
    }
}

impl FromStr for Buttons {
    type Err = SurfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buttons = Buttons::NONE;
        for code in s.chars() {
            let button = Button::from_code(code).ok_or_else(|| {
                SurfError::ProtocolError(format!("unknown button code '{}'", code))
            })?;
            buttons.press(button);
        }
        Ok(buttons)
    }
}

/// Action for one step: which buttons are held and how far to turn the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepAction {
    /// When false the game ignores the rest of the action and the player is
    /// driven by a human
    pub ai_active: bool,
    pub buttons: Buttons,
    /// Horizontal look delta in [-1, 1]
    pub look_h: f64,
    /// Vertical look delta in [-1, 1]
    pub look_v: f64,
}

impl StepAction {
    pub fn new(buttons: Buttons, look_h: f64, look_v: f64) -> Self {
        Self {
            ai_active: true,
            buttons,
            look_h: look_h.clamp(-1.0, 1.0),
            look_v: look_v.clamp(-1.0, 1.0),
        }
    }

    /// Hand control to a human player for this tick
    pub fn idle() -> Self {
        Self {
            ai_active: false,
            buttons: Buttons::NONE,
            look_h: 0.0,
            look_v: 0.0,
        }
    }

    /// Wire payload: `ai_active_flag,buttons,look_h,look_v`
    pub fn to_payload(&self) -> String {
        format!(
            "{},{},{:?},{:?}",
            u8::from(self.ai_active),
            self.buttons,
            self.look_h,
            self.look_v
        )
    }
}

impl Default for StepAction {
    fn default() -> Self {
        Self::idle()
    }
}
