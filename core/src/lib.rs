//! Core of a seller-financed real-estate sales system: amortization
//! schedules, commission splits, late-payment penalty accrual, payment
//! gateway reconciliation, and the bearer-token gate in front of it all.
//!
//! Layering, leaves first: the pure calculators (`amortization`,
//! `commission`) know nothing about storage; the engines
//! (`penalty_accrual`, `reconciliation`, `auth`, `sales`) talk to the
//! store and journal what they did to the event log.

pub mod amortization;
pub mod auth;
pub mod clock;
pub mod commission;
pub mod config;
pub mod error;
pub mod event;
pub mod penalty_accrual;
pub mod reconciliation;
pub mod sales;
pub mod store;
pub mod types;
