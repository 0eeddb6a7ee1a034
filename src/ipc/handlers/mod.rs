pub mod attendance;
pub mod children;
pub mod core;
pub mod escalations;
pub mod settings;
