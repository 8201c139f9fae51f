mod hash;

pub use hash::*;
