pub mod config;
pub mod logging;

pub mod bus;
pub mod control;
pub mod pool;
pub mod remote;
pub mod service;
pub mod store;
pub mod watermark;
pub mod worker;
