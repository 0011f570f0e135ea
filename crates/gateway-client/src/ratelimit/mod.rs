//! Outbound write throttling

mod rate_gate;

pub use rate_gate::RateGate;
