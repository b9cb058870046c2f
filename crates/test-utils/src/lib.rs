//! Shared test helpers for the idemflow workspace.

pub mod db;
