pub mod accumulator;
pub mod connection;
pub mod coordinator;
pub mod front_end;
pub mod registry;
