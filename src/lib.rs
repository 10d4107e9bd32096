pub mod capture_management;
pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod payload_analysis;
pub mod storage;
