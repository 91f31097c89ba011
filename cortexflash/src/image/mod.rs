//! Input images.

pub mod binary;

pub use binary::BinaryImage;
