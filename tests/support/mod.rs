#![allow(dead_code)]

pub mod bitcoind;
pub mod port;
pub mod wait;
