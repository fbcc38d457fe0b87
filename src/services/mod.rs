pub mod connectivity;
pub mod local_store;
pub mod mutation_outbox;
pub mod photo_drain;
pub mod photo_outbox;
pub mod settings_service;
pub mod sync_drain;
pub mod sync_engine;
