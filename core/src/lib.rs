pub mod achievements;
pub mod calendar;
pub mod conversation;
pub mod error;
pub mod reminders;
