pub mod blocks;
pub mod config;
pub mod document;
pub mod embed;
pub mod feed;
pub mod html;
pub mod migrations;
pub mod runner;
pub mod slug;
pub mod source;
pub mod store;
pub mod tags;

#[cfg(test)]
pub(crate) mod testing;
