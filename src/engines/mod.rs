//! Voice-cloning engines.
//!
//! This module contains implementations of [`VoiceCloneEngine`](crate::VoiceCloneEngine).
//!
//! # Available Engines
//!
//! - `worker` - drives a long-lived external process hosting the pre-trained
//!   model over a line-delimited JSON protocol

pub mod worker;
