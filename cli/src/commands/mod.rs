pub mod achievements;
pub mod chat;
pub mod health;
pub mod reminders;
