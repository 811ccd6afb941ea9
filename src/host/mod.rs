//! 无头评估主机的生命周期：启动、就绪轮询、关闭

pub mod connection;
pub mod launcher;

pub use connection::{probe, wait_for_host, Readiness};
pub use launcher::{launch_headless_host, HostLaunchOptions, HostProcess};
