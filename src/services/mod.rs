/// Admin read model behind the dashboard snapshot.
pub mod admin_service;
/// Per-room allocation watcher driving OPENED rooms to ACTIVED or DEAD.
pub mod allocation;
/// OpenAPI documentation generation.
pub mod documentation;
/// Store-backed health status.
pub mod health_service;
/// Ticket lifecycle and FIFO pairing.
pub mod matchmaker;
/// Two-way sync between the room table and the orchestrator.
pub mod reconciler;
