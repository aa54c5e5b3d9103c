// Shared runtime utilities

pub mod clock;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
