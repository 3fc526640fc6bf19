pub mod replay;
pub mod result;
pub mod validate;
