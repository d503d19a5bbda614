//! The gateway's HTTP surface, built on top of [`meridian_core::Pipeline`].

mod routes;

pub use routes::build_router;
