//! Part Folder + Card Streamer (spec §4.4 "C4", §4.5 "C5").
//!
//! `fold` consumes the agent's unordered, duplicate-prone event stream
//! into an ordered rendering model; `render` turns that model into
//! platform cards under the spec's size budgets; `streamer` owns the
//! throttled, rate-limit-aware update loop that pushes those cards to a
//! [`lanebridge_core::traits::Channel`].

pub mod fold;
pub mod render;
pub mod streamer;

pub use fold::{FoldError, PartFolder};
pub use render::RenderConfig;
pub use streamer::{CardStreamer, StreamerConfig, StreamerError};
