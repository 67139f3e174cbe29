//  Copyright 2026 larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

/// Store error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A capacity target could not be met because too many resident bytes are
    /// pinned by handles held outside the store.
    #[error("insufficient reclaimable space (capacity: {capacity}, resident: {resident}, pinned: {pinned})")]
    NoSpace {
        /// Capacity target that could not be met, in bytes.
        capacity: usize,
        /// Bytes resident when the attempt gave up.
        resident: usize,
        /// Resident bytes charged to entries whose values are referenced
        /// outside the store.
        pinned: usize,
    },
}

/// Store result type.
pub type Result<T> = std::result::Result<T, Error>;
