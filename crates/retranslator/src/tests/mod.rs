//! Engine tests against an in-memory outbox and a scripted publisher.
//!
//! - `harness.rs`: publisher and store doubles, seeding helpers
//! - `delivery.rs`: claiming, drain mode and ordering
//! - `retry.rs`: attempt counting, terminal failure, store outages
//! - `shutdown.rs`: close semantics and claim release
