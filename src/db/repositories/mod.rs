pub mod battery_data;
pub mod configuration;
pub mod logs;
pub mod maintenance;
