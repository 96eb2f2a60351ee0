// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Declarative build and packaging for a multi-language monorepo.
//!
//! Build units are declared in per-directory `HACK_BUILD` descriptors and
//! addressed by `PATH:NAME` target ids. Resolving a set of targets yields
//! their transitive dependency trees; the scheduler then drives every target
//! through four ordered phases (source staging, build environment, binary
//! build, packaging), producing distributable packages under `pkg/`.

pub mod build;
pub mod builder;
pub mod descriptor;
pub mod plugins;
pub mod repo;
pub mod resolver;
pub mod session;
pub mod target;
