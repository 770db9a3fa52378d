//! Test doubles for driving a monitor without hardware, network or real time

pub mod mocks;

pub use mocks::*;
