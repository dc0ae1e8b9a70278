pub mod backend;
pub mod canonical;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod session;
pub mod telemetry;
pub mod translate;
