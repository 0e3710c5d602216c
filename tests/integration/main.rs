//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one subsystem through the public
//! [`BusEngine`](devbus::BusEngine) API, with simulated remote devices
//! feeding frames into it.  No real transport is involved.

mod flash_tests;
mod gesture_tests;
mod sim;
mod topology_tests;
