pub mod credentials;
pub mod login;
pub mod logout;
pub mod server;
