//! Wire framing codec (§4.B, §6): fixed-header frames plus the
//! length-prefixed string/byte-vector primitives the rest of the crate
//! builds envelopes out of.

pub mod frame;
pub mod wire;
