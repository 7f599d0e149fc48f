//! Wire module - box format, framing, and the resumable decoder.
//!
//! This module implements the box wire format:
//! - ordered key/value message type with control-key accessors
//! - length-prefixed encoding terminated by an empty key
//! - box buffer for accumulating partial reads

mod codec;
mod wirebox;

pub use codec::{encode_box, BoxBuffer, DEFAULT_MAX_BOX_SIZE};
pub use wirebox::{
    WireBox, ANSWER_KEY, ASK_KEY, COMMAND_KEY, ERROR_KEY, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
