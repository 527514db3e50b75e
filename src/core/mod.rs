pub mod broker_session;
pub mod discovery_builder;
pub mod publisher;
