//! Rasterisation and compositing stages shared by the preview and the report.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and a backend can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ selector ──▶ backend ──▶ compose
//! (plan PDF)  (fallback)   (pdfium │     (marker at
//!                           pdftoppm │    geometry)
//!                           gs)
//!
//! photos / fetch ──▶ report          janitor: every temp file above
//! ```
//!
//! 1. [`input`]        — resolve and validate the plan's PDF on disk
//! 2. [`availability`] — which backends this host can run, probed once
//! 3. [`selector`]     — try available backends in fixed priority order
//! 4. [`backend`]      — the three rasterisers behind one trait
//! 5. [`geometry`]     — normalized → pixel mapping and marker placement
//! 6. [`compose`]      — draw the marker glyph onto a copy of the raster
//! 7. [`photos`] / [`fetch`] — local and remote photo lookup for reports
//! 8. [`janitor`]      — scoped cleanup of intermediate files

pub mod availability;
pub mod backend;
pub mod compose;
pub mod fetch;
pub mod geometry;
pub mod input;
pub mod janitor;
pub mod photos;
pub mod selector;
