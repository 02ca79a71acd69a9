pub mod fingerprint;
pub mod text;

pub use fingerprint::*;
pub use text::*;
