//! Photo library: the record store and everything that reads or writes it.

pub mod calendar;
pub mod clustering;
pub mod dating;
pub mod display;
pub mod enrichment;
pub mod handlers;
pub mod persistence;
pub mod store;
