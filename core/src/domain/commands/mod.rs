//! Command and result types for the domain services. Services take a
//! command struct and return a result struct so the call surface stays
//! stable while fields evolve.

pub mod balance;
pub mod dashboard;
pub mod schedule;
pub mod transfer;
