// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types

use crate::id::ResHandle;
use std::fmt;

/// Registry error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Slot table or backing store is full
    CapacityExceeded { what: &'static str, capacity: usize },

    /// Descriptor declined to build a payload
    ConstructFailed { name: String, retryable: bool },

    /// Descriptor failed to rebuild a payload the caller asked to reload
    ReloadFailed { name: String, retryable: bool },

    /// Name or id lookup miss
    NotFound(String),

    /// Listener already registered on a slot
    DuplicateListener { name: String, listener: ResHandle },

    /// Listener missing from a slot
    ListenerNotFound { name: String, listener: ResHandle },

    /// Eviction refused because dependents are still attached
    ListenersAttached { name: String, count: usize },

    /// Release of a slot whose refcount is already zero
    NotAcquired(String),

    /// Empty or over-long resource name
    InvalidName(String),

    /// Unknown registry id
    RegistryNotFound,

    /// Registry is already running a callback (reentrant call)
    RegistryBusy(String),

    /// Typed access through a key of the wrong descriptor type
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Operation not allowed while a cascading reload is running
    CascadeInProgress,

    /// User-data index out of range
    InvalidUserDataSlot(usize),

    /// Invalid configuration
    Config(String),

    /// Payload did not match the requested type
    DeserializationError(String),

    /// IO error (file operations, etc.)
    Io(String),
}

impl RegistryError {
    /// Whether a failed load may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::ConstructFailed { retryable, .. }
            | RegistryError::ReloadFailed { retryable, .. } => *retryable,
            RegistryError::Io(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::CapacityExceeded { what, capacity } => {
                write!(f, "Capacity exceeded: {what} holds at most {capacity} entries")
            }
            RegistryError::ConstructFailed { name, retryable } => {
                write!(f, "Failed to construct '{name}' (retryable: {retryable})")
            }
            RegistryError::ReloadFailed { name, retryable } => {
                write!(f, "Failed to reload '{name}' (retryable: {retryable})")
            }
            RegistryError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            RegistryError::DuplicateListener { name, listener } => {
                write!(f, "Listener {listener} already registered on '{name}'")
            }
            RegistryError::ListenerNotFound { name, listener } => {
                write!(f, "Listener {listener} is not registered on '{name}'")
            }
            RegistryError::ListenersAttached { name, count } => {
                write!(f, "Cannot evict '{name}': {count} listener(s) still attached")
            }
            RegistryError::NotAcquired(name) => {
                write!(f, "Release of '{name}' with refcount already zero")
            }
            RegistryError::InvalidName(msg) => write!(f, "Invalid resource name: {msg}"),
            RegistryError::RegistryNotFound => write!(f, "Registry not found"),
            RegistryError::RegistryBusy(label) => {
                write!(f, "Registry '{label}' is busy (reentrant call)")
            }
            RegistryError::KindMismatch { expected, found } => {
                write!(f, "Registry kind mismatch: expected {expected}, found {found}")
            }
            RegistryError::CascadeInProgress => {
                write!(f, "Operation not allowed during a cascading reload")
            }
            RegistryError::InvalidUserDataSlot(index) => {
                write!(f, "User-data slot {index} is out of range")
            }
            RegistryError::Config(msg) => write!(f, "Configuration error: {msg}"),
            RegistryError::DeserializationError(msg) => write!(f, "Deserialization error: {msg}"),
            RegistryError::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RegistryError>;
