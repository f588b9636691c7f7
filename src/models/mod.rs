pub use amount_codec::*;

pub mod amount_codec;
