//! Shaders and the passes that draw a frame.
//!
//! - `shader`: programs plus material binding rules
//! - `lighting`: per-light-window accumulation into a float buffer
//! - `composite`: lighting times unlit colour onto the default target
//! - `transparent`: back-to-front alpha blended nodes
//! - `basic`: wgpu pipeline construction shared by every program

pub mod basic;
pub mod composite;
pub mod lighting;
pub mod shader;
pub mod transparent;
