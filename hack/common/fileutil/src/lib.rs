// Copyright 2025 The Hackbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod copy;
mod mirror;
mod path;
mod remove;

pub use copy::*;
pub use mirror::*;
pub use path::*;
pub use remove::*;
