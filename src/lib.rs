//! Turnstile - Fixed-Window Rate Limiting Gateway
//!
//! This crate implements an HTTP gateway that sits in front of a website and
//! limits how many requests each client may make per fixed window. API
//! traffic and general page traffic are limited independently; admitted
//! requests are forwarded to the upstream site with quota headers attached.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
