pub mod audit_log;
pub mod credentials;
pub mod operator;
pub mod rate_limit;
pub mod sanitizer;
pub mod session;
