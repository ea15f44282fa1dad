pub mod cli;
pub mod cli_handlers;
pub mod web;
