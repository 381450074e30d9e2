// Copyright 2026 Gatekeeper Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Gatekeeper Storage
//!
//! The per-shard LRU profile registry, the probabilistic sketches shared by
//! the detector layer, and the checkpoint container codec. Nothing in this
//! crate is shared across threads; every type here is owned exclusively by
//! the shard worker that uses it.

pub mod checkpoint;
pub mod error;
pub mod registry;
pub mod sketches;

pub use checkpoint::{decode_container, encode_container, DecodedCheckpoint};
pub use error::{Result, StorageError};
pub use registry::{Evictable, Registry, RegistryStats};
pub use sketches::{CountMinSketch, HyperLogLog};
