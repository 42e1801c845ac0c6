#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use webhook_proxy_core as core;
pub use webhook_proxy_core::k8s;
pub use webhook_proxy_dispatch as dispatch;
pub use webhook_proxy_k8s_reconcile as reconcile;

mod admission;
mod args;
mod config;
mod controller;

pub use self::args::Args;
