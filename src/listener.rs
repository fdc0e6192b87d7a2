/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Listeners, their filter chains, and the selection of a single filter chain
//! for every accepted connection.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod matcher;
pub mod registry;
pub mod specificity;
pub mod table;

#[doc(inline)]
pub use self::{
    config::{DrainType, Filter, FilterChain, FilterChainMatch, Listener, TransportSocket},
    dispatcher::{Binding, ConnectionInfo, DispatchOutcome, Dispatcher},
    error::ConfigError,
    instance::{ConnectionGuard, ListenerInstance, State},
    registry::{ListenerRegistry, Settings, Snapshot, UpdateSummary},
    specificity::{Attributes, Specificity},
    table::{FilterChainEntry, FilterChainTable},
};
