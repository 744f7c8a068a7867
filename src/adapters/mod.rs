pub mod memory;
pub mod postgres_job_repository;
pub mod postgres_ledger_repository;
pub mod postgres_virtual_account_repository;
pub mod redis_nonce_store;

pub use memory::MemoryStore;
pub use postgres_job_repository::PostgresJobRepository;
pub use postgres_ledger_repository::PostgresLedgerRepository;
pub use postgres_virtual_account_repository::PostgresVirtualAccountRepository;
pub use redis_nonce_store::RedisNonceStore;
