//! Integration test crate for soundmix.
//!
//! Holds cross-crate tests that drive the mixer the way a driver and a set
//! of control threads would.

#[cfg(test)]
mod audio;

#[cfg(test)]
mod concurrency;

#[cfg(test)]
mod system;
