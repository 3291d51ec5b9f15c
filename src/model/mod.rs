pub mod device;
pub mod session;
pub mod user;
pub mod user_device;
