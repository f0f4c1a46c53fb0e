pub mod chat;
pub mod doctor;
pub mod onboard;
pub mod warmup;
