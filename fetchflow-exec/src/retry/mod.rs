mod config;

pub use config::RetryPassConfig;
