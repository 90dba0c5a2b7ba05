//! The rust main program running on the capture kiosk and responsible for
//! pairing sessions, liveness validation and uploads.
//!
//! # Architecture
//!
//! The [`controller`] module documentation describes the chosen
//! architecture: one supervisor-owned controller value, a bounded command
//! queue for every external actor, and session plans that run on the
//! controller's single task.
//!
//! # Guidelines
//!
//! The code should be formatted with Rustfmt, should pass clippy lints in
//! pedantic mode, and should pass the `#[warn(missing_docs)]` lint.

#![warn(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod admin;
pub mod agents;
pub mod backend;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod consts;
pub mod controller;
pub mod ext;
pub mod image;
pub mod liveness;
pub mod logger;
pub mod phase;
pub mod plans;
pub mod store;
pub mod ui;

use eyre::Result;
use futures::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A wrapper for the main function, which runs common initialization
/// routines and takes a future to execute as the main function.
#[allow(clippy::missing_panics_doc)]
pub fn async_main<F: Future<Output = Result<()>>>(f: F) -> Result<()> {
    color_eyre::install()?;
    let future = async {
        match f.await {
            Ok(()) => {
                // Other async tasks in this runtime may still be running;
                // we are completely done by now, it's safe to end them.
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("Fatal error: {err:?}");
                std::process::exit(1);
            }
        }
    };
    tokio::runtime::Builder::new_multi_thread()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::Relaxed);
            format!("kiosk-worker-{id}")
        })
        .enable_all()
        .build()
        .expect("failed to initialize async runtime")
        .block_on(future)
}
