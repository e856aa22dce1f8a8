//! Pin numbering for the 40-pin Raspberry Pi header
//!
//! Configured pins are either BCM channel numbers or physical header
//! positions ("board" numbering, the scheme of the `config.json` deployments).
//! Both are turned into a kernel GPIO line by adding the base of the GPIO
//! chip, which is 0 on older kernels and 512 on 6.6 and later.

use serde::{Deserialize, Serialize};

/// How configured pin numbers are interpreted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// BCM channel numbers
    #[default]
    Bcm,
    /// Physical header positions
    Board,
}

/// Physical header position to BCM channel; power and ground pins are absent
const BOARD_TO_BCM: &[(u32, u32)] = &[
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// BCM channel wired to a physical header position
pub fn board_to_bcm(board_pin: u32) -> Option<u32> {
    BOARD_TO_BCM
        .iter()
        .find(|(board, _)| *board == board_pin)
        .map(|(_, bcm)| *bcm)
}

/// Resolves configured pins to kernel GPIO lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinMap {
    pub numbering: PinNumbering,
    /// Base line number of the GPIO chip
    pub base: u32,
}

impl PinMap {
    pub fn new(numbering: PinNumbering, base: u32) -> Self {
        Self { numbering, base }
    }

    /// Kernel line for a configured pin, `None` if the pin is not a GPIO
    pub fn line(&self, pin: u32) -> Option<u32> {
        let channel = match self.numbering {
            PinNumbering::Bcm => pin,
            PinNumbering::Board => board_to_bcm(pin)?,
        };
        self.base.checked_add(channel)
    }
}
