//! Daily question assignment in the user's local calendar.

pub mod calendar;
pub mod select;

pub use calendar::{local_midnight_utc, local_today, user_local_day_range};
pub use select::{DailySelector, Selection, SelectionInputs, select, shortfall};
