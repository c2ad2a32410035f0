//! Current weather for a typed city, with a joke when the city typed is the
//! one you are already in.

pub mod catalog;
pub mod client;
pub mod config;
pub mod controller;
pub mod location;
pub mod render;
