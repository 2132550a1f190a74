//! Narrow pattern matchers over decoded message bodies.
//!
//! Each extractor looks for exactly one thing and returns `None` when the
//! body does not contain it; a miss is never an error.

pub mod api_token;
pub mod verification_link;

pub use api_token::TokenExtractor;
pub use verification_link::LinkExtractor;
