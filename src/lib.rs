//! Traffic Light Library
//!
//! A single traffic light whose phase is cycled by a background thread, with
//! blocking "wait for green" notifications for any number of consumers.

pub mod simulation;
