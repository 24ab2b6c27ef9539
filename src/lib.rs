// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manage a fleet of local repositories.
//!
//! gkn treats every Git repository under one __repos root__ as part of a
//! fleet. It can locate repositories by name, run commands across them, and
//! keep a shared set of __skills__, i.e., plain files living in one source
//! directory, propagated into every repository of the fleet.
//!
//! # Layout
//!
//! - [`repo`]: discover, filter, and match repositories.
//! - [`sync`]: copy, link, or mirror files between directory trees.
//! - [`skills`]: fan sync targets out across the fleet.
//! - [`exec`]: run commands across repositories with bounded concurrency.
//! - [`guard`]: allow and deny rules for commands and paths.
//! - [`git`]: work tree inspection and cloning through libgit2.
//! - [`watch`]: poll a source work tree for changes.
//! - [`config`]: configuration file layout and loading.
//! - [`output`]: user facing result reporting.

pub mod config;
pub mod exec;
pub mod git;
pub mod glob;
pub mod guard;
pub mod output;
pub mod path;
pub mod repo;
pub mod skills;
pub mod sync;
pub mod watch;
