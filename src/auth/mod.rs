pub mod accounts;
pub mod credentials;
pub mod session;
