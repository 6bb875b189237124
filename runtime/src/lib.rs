// Copyright 2026 Pricewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pricewatch runtime: keeps provider pricing snapshots fresh.
//!
//! A refresh acquires the provider's pages, sends their text to an
//! extraction service, scores the candidate with the
//! [`pricewatch::ConfidenceEvaluator`], and commits it only when accepted.
//! Rejected candidates never overwrite the last good snapshot.

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod extraction;
pub mod maintenance;
pub mod registry;
pub mod renderer;
pub mod store;
pub mod tasks;
