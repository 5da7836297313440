//! HTTP API: routing, request/response mapping, and the server binary.

pub mod app;
