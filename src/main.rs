use crate::cli::run;

pub mod cli;
mod config;
pub mod domain;
pub mod http;
pub mod storage;
pub mod sweep;

fn main() {
    run();
}
