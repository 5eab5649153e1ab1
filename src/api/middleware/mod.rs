//! Middleware applied to the API router

pub mod auth;
