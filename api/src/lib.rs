pub mod info;
pub mod reference;
pub mod urls;

pub use reference::{FileReference, InvalidReference};
