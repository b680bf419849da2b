pub mod auth;
pub mod init;
pub mod shop;
pub mod status;
