//! Parlay odds arithmetic and tiered usage quotas, with a cached multi-book
//! odds feed and a small JSON API on top.

pub mod api;
pub mod config;
pub mod db;
pub mod feed;
pub mod odds;
pub mod quota;
