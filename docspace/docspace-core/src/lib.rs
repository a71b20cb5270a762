pub mod cache;
pub mod catalog;
pub mod config;
pub mod content;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod selection;
pub mod session;
pub mod tree;
