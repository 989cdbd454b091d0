pub mod auth;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod lots;
pub mod model;
pub mod observability;
pub mod policy;
pub mod seed;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
