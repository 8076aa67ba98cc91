//! When to stop listening and boot the application.

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BootState {
    Listening,
    Running,
}

/// Latched boot decision. `Running` is terminal: once the policy
/// decides to launch, nothing within the same boot cycle reverses it.
pub struct BootPolicy {
    window: u32,
    deadline: u32,
    state: BootState,
}

impl BootPolicy {
    pub const fn new(window_ticks: u32) -> Self {
        Self {
            window: window_ticks,
            deadline: window_ticks,
            state: BootState::Listening,
        }
    }

    /// Called for every received byte: an active host keeps the window
    /// open, so a long flash session is never cut off mid-transfer.
    pub fn note_activity(&mut self, now: u32) {
        if self.state == BootState::Listening {
            self.deadline = now.saturating_add(self.window);
        }
    }

    /// An explicit start-application command closes the window at any
    /// time, elapsed or not.
    pub fn force_launch(&mut self) {
        self.state = BootState::Running;
    }

    /// Evaluates the timeout. `hold` is the boot-request condition
    /// (pin level or persistent flag); while asserted the window never
    /// expires.
    pub fn update(&mut self, now: u32, hold: bool) -> BootState {
        if self.state == BootState::Listening && now >= self.deadline && !hold {
            self.state = BootState::Running;
        }
        self.state
    }

    pub fn state(&self) -> BootState {
        self.state
    }
}
