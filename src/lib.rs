#![allow(async_fn_in_trait)]
pub mod boundary;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo_utils;
pub mod merge;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod run;
pub mod selection;
pub mod temporal;
