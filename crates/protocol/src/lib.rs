#![forbid(unsafe_code)]

mod command;
mod parse;
mod reply;

pub use command::Command;
pub use parse::{Parse, tokenize};
pub use reply::Reply;
