// src/cninfo/mod.rs
pub mod client;
pub mod models;

pub use client::{HttpRequest, HttpResponse, HttpTransport, HttpTransportFactory, Transport, TransportFactory};
pub use models::{DocumentRecord, DownloadTask};
