pub mod capabilities;
pub mod config_cmd;
pub mod cost;
pub mod run;
