pub mod bluetooth;
pub mod catalog;
pub mod logging;
