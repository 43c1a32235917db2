//! Weight quantization formats
//!
//! - [`pack`]: sub-byte packing of integer weights into 32-bit words
//! - [`dequant`]: unpack + scale / zero-point arithmetic used inside the kernels

pub mod dequant;
pub mod pack;

pub use dequant::{ChannelScaleMode, DequantParams, Dequantizer, GroupMode, ZeroPoint};
pub use pack::{elements_per_sample, pack_weights, unpack_mask, unpack_weights};
