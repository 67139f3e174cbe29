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

/// Operation counters of a store, maintained under the store lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    /// insertions that linked an entry
    pub insert: usize,
    /// insertions abandoned for lack of reclaimable space, index growth
    /// failure or an equal resident key
    pub reject: usize,
    /// lookups that found their entry
    pub hit: usize,
    /// lookups that found nothing
    pub miss: usize,
    /// explicit removals that found their entry
    pub remove: usize,
    /// entries unlinked by budget pressure, scavenging, shrinking, clearing
    /// or store teardown
    pub evict: usize,
}
