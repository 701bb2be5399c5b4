//! newsreel: keyword search and category headlines from a NewsAPI-style
//! service, paginated through a local SQLite cache.
//!
//! Layers, leaves first:
//!
//! - [`util`]: text sanitizing and terminal fitting
//! - [`cancel`]: cooperative cancellation tokens
//! - [`api`]: the remote fetch client behind the [`api::NewsSource`] trait
//! - [`storage`]: the article cache
//! - [`repository`]: fetch-then-cache per selector
//! - [`controller`]: the pagination and refresh state machine
//! - [`config`] and [`render`]: the command-line front end's support

pub mod api;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod render;
pub mod repository;
pub mod storage;
pub mod util;
