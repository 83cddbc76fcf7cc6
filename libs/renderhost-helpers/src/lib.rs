// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Test-helper binaries for `renderhost`. See `src/bin/`.
