//! RUN and ERR LED patterns, as defined in ETG.1300.

use crate::al_state::AlState;

/// LED pattern.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    /// Constantly off.
    #[default]
    Off,
    /// Constantly on.
    On,
    /// 200ms on, 200ms off.
    Blinking,
    /// 200ms on, 1000ms off.
    SingleFlash,
    /// 200ms on, 200ms off, 200ms on, 1000ms off.
    DoubleFlash,
    /// 50ms on, 50ms off.
    Flickering,
}

impl LedPattern {
    fn period_ms(self) -> u32 {
        match self {
            LedPattern::Off | LedPattern::On => 1,
            LedPattern::Blinking => 400,
            LedPattern::SingleFlash => 1200,
            LedPattern::DoubleFlash => 1600,
            LedPattern::Flickering => 100,
        }
    }

    /// LED level `phase_ms` into the pattern.
    pub fn level(self, phase_ms: u32) -> bool {
        let t = phase_ms % self.period_ms();

        match self {
            LedPattern::Off => false,
            LedPattern::On => true,
            LedPattern::Blinking | LedPattern::SingleFlash => t < 200,
            LedPattern::DoubleFlash => t < 200 || (400..600).contains(&t),
            LedPattern::Flickering => t < 50,
        }
    }

    /// RUN LED pattern for an AL state.
    pub fn run(state: AlState) -> Self {
        match state {
            AlState::Init | AlState::Other(_) => LedPattern::Off,
            AlState::PreOp => LedPattern::Blinking,
            AlState::SafeOp => LedPattern::SingleFlash,
            AlState::Op => LedPattern::On,
            AlState::Bootstrap => LedPattern::Flickering,
        }
    }
}

/// Reason shown on the ERR LED.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorIndication {
    /// No error.
    #[default]
    None,
    /// A state change requested by the MainDevice was refused.
    InvalidConfiguration,
    /// The SubDevice changed state on its own due to a local error.
    LocalError,
    /// A process data or sync watchdog expired.
    WatchdogTimeout,
    /// Entering or running the bootstrap state failed.
    BootError,
}

impl ErrorIndication {
    /// ERR LED pattern for this indication.
    pub fn pattern(self) -> LedPattern {
        match self {
            ErrorIndication::None => LedPattern::Off,
            ErrorIndication::InvalidConfiguration => LedPattern::Blinking,
            ErrorIndication::LocalError => LedPattern::SingleFlash,
            ErrorIndication::WatchdogTimeout => LedPattern::DoubleFlash,
            ErrorIndication::BootError => LedPattern::Flickering,
        }
    }
}

/// A single LED driven by a pattern.
#[derive(Debug, Default)]
pub struct Indicator {
    pattern: LedPattern,
    phase_ms: u32,
    level: Option<bool>,
}

impl Indicator {
    /// Switch to a new pattern. Restarts the pattern if it differs from the current one.
    pub fn set_pattern(&mut self, pattern: LedPattern) {
        if pattern != self.pattern {
            self.pattern = pattern;
            self.phase_ms = 0;
        }
    }

    /// Current pattern.
    pub fn pattern(&self) -> LedPattern {
        self.pattern
    }

    /// Advance by one millisecond. Returns the new level if the LED must change.
    pub fn tick_1ms(&mut self) -> Option<bool> {
        let level = self.pattern.level(self.phase_ms);

        self.phase_ms = (self.phase_ms + 1) % self.pattern.period_ms();

        if self.level == Some(level) {
            None
        } else {
            self.level = Some(level);

            Some(level)
        }
    }
}
