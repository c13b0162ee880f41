pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod db;
pub mod http;
pub mod images;
pub mod import;
pub mod model;
pub mod orders;
pub mod outbox;
pub mod price;
pub mod telegram;
