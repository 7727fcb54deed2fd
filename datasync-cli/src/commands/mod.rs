pub mod daemon;
pub mod dispatch;
pub mod notify;
pub mod validate;
