pub mod commands;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod fs_utils;
pub mod paths;
pub mod registry;
pub mod store;
pub mod ui;

#[cfg(test)]
pub mod test_utils;
