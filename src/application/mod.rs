// Snapshot -> message formatting
pub mod formatter;

// Broker connection lifecycle
pub mod connection_manager;

// Flush pipeline
pub mod publisher;

// Health reporting
pub mod status;

// Backend entry point
pub mod backend;
