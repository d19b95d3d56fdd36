pub mod experiment;
pub mod logging;
pub mod notification;
pub mod services;
