//! Background tasks driven by wall-clock intervals.

mod housekeeping;
mod window_reset;

pub use housekeeping::HousekeepingTask;
pub use window_reset::WindowResetTask;
