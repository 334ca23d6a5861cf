//! Synthetic counter payload
//!
//! Produces `"<v>,<-v>\n"` for `v = 0, 1, 2, ...`, one line per connected
//! tick. The sequence does not reset across connections.

use core::fmt::Write;

use heapless::String;

use crate::config::pump::COUNTER_LINE_LEN;

/// One formatted counter line
pub type CounterLine = String<COUNTER_LINE_LEN>;

#[derive(Debug, Default)]
pub struct SyntheticCounter {
    value: i32,
}

impl SyntheticCounter {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Value the next line will carry
    pub fn peek(&self) -> i32 {
        self.value
    }

    /// Format the current value and advance
    pub fn next_line(&mut self) -> CounterLine {
        let mut line = CounterLine::new();
        // i32::MIN and its negation fit in 24 bytes
        let _ = writeln!(line, "{},{}", self.value, self.value.wrapping_neg());
        self.value = self.value.wrapping_add(1);
        line
    }
}
