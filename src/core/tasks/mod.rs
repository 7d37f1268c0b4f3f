// src/core/tasks/mod.rs

//! This module contains the long-running background tasks that maintain the
//! connection pool.

pub mod lifecycle;
