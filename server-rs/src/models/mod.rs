pub mod listing;
pub mod review;

pub use listing::*;
pub use review::*;
