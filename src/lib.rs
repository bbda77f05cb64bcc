// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Dispatch domain
pub mod blacklist;
pub mod channels;
pub mod idempotency;
pub mod notification;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod template;

// Transport and composition
pub mod engine;
pub mod queue;
pub mod tasks;

// Ops surface
pub mod api;
pub mod server;
