pub mod config;
pub mod doctor;
pub mod items;
pub mod progress;
pub mod run;
