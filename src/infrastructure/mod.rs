pub mod amqp;
mod close_watch;
pub mod event_hub;
pub mod mock;
pub mod observability;

pub use amqp::LapinConnector;
pub use event_hub::EventHub;
pub use mock::MockBroker;
