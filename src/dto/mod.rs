/// Admin overview payloads.
pub mod admin;
/// Health check payloads.
pub mod health;
/// Room state and shutdown callback payloads.
pub mod room;
/// Ticket lifecycle payloads.
pub mod ticket;
