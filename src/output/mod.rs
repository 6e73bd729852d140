#![forbid(unsafe_code)]

pub mod records;
pub mod table;
