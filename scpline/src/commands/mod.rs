pub mod check;
mod common;
pub mod pull;
pub mod push;
