//! Attractor engine crate.
//!
//! Window runtime, GPU device, and the frame graph that replays a fixed list of GPU
//! passes every frame.

pub mod core;
pub mod device;
pub mod graph;
pub mod logging;
pub mod time;
pub mod window;
