// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera access
//!
//! The session layer never touches hardware. It drives the traits in
//! [`camera`], which a platform implements:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Session Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Stream handle   │  │   Candidates    │  │
//! │  │   + monitor      │  │ (photo/video/   │  │
//! │  └──────────────────┘  │      scan)      │  │
//! │  ┌──────────────────┐  └─────────────────┘  │
//! │  │ Platform traits  │                       │
//! │  │  (or simulated)  │                       │
//! │  └──────────────────┘                       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
