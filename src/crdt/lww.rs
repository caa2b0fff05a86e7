//! Last-writer-wins register
//!
//! Merge keeps the state with the higher timestamp; ties break toward the
//! lexicographically greater writer id so that every replica picks the same
//! winner. Values are opaque to the register.

use crate::common::timestamp_now_millis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    timestamp: u64,
    writer: String,
}

impl<T: Clone> LwwRegister<T> {
    pub fn new(value: T, writer: impl Into<String>) -> Self {
        Self {
            value,
            timestamp: timestamp_now_millis(),
            writer: writer.into(),
        }
    }

    /// Construct with an explicit timestamp (replays, tests).
    pub fn with_timestamp(value: T, timestamp: u64, writer: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            writer: writer.into(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn writer(&self) -> &str {
        &self.writer
    }

    /// Record a new local write, stamped with the current wall clock.
    pub fn set(&mut self, value: T, writer: impl Into<String>) {
        self.set_at(value, timestamp_now_millis(), writer);
    }

    /// Record a write with an explicit timestamp, keeping whichever state
    /// wins under the LWW rule.
    pub fn set_at(&mut self, value: T, timestamp: u64, writer: impl Into<String>) {
        let writer = writer.into();
        if timestamp > self.timestamp || (timestamp == self.timestamp && writer > self.writer) {
            self.value = value;
            self.timestamp = timestamp;
            self.writer = writer;
        }
    }

    /// Adopt the other register's state iff it wins the LWW comparison.
    pub fn merge(&mut self, other: &Self) {
        if other.timestamp > self.timestamp
            || (other.timestamp == self.timestamp && other.writer > self.writer)
        {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
            self.writer = other.writer.clone();
        }
    }
}
