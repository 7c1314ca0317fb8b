#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::ignored_unit_patterns
)]

pub mod config;
pub mod connection;
pub mod edit;
pub mod editor;
pub mod error;
pub mod event;
pub mod mirror;
pub mod page;
pub mod panel;
pub mod probe;
pub mod protocol;
pub mod session;
pub mod store;
