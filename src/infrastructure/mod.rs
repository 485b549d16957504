//! External concerns: persistence, cache/bus, payment providers.

pub mod bus;
pub mod database;
pub mod memory;
pub mod provider;

pub use bus::memory::MemoryBus;
pub use bus::Bus;
pub use database::{init_database, SeaOrmRepositoryProvider};
pub use memory::InMemoryRepositories;
pub use provider::{create_provider, PaymentProvider};
