pub mod encoding;
pub mod hash;
pub mod time;

pub use encoding::{decode, encode, from_hex, to_hex};
pub use hash::HashType;
