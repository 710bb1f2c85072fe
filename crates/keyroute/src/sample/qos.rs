// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery quality of service attached to every sample.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a publisher does when the fabric cannot keep up.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionControl {
    /// Drop the message.
    #[default]
    Drop = 0,
    /// Block the publisher until there is room.
    Block = 1,
}

/// Message priority; lower value is more urgent.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    RealTime = 1,
    InteractiveHigh = 2,
    InteractiveLow = 3,
    DataHigh = 4,
    #[default]
    Data = 5,
    DataLow = 6,
    Background = 7,
}

impl Priority {
    pub const MAX: Priority = Priority::RealTime;
    pub const MIN: Priority = Priority::Background;
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Priority::RealTime),
            2 => Ok(Priority::InteractiveHigh),
            3 => Ok(Priority::InteractiveLow),
            4 => Ok(Priority::DataHigh),
            5 => Ok(Priority::Data),
            6 => Ok(Priority::DataLow),
            7 => Ok(Priority::Background),
            other => Err(Error::InvalidState(format!(
                "priority {} out of range 1..=7",
                other
            ))),
        }
    }
}

/// Quality of service of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QoS {
    pub congestion_control: CongestionControl,
    pub priority: Priority,
    /// Skip batching; send as soon as possible.
    pub express: bool,
}

impl QoS {
    pub fn congestion_control(mut self, cc: CongestionControl) -> Self {
        self.congestion_control = cc;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn express(mut self, express: bool) -> Self {
        self.express = express;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let qos = QoS::default();
        assert_eq!(qos.congestion_control, CongestionControl::Drop);
        assert_eq!(qos.priority, Priority::Data);
        assert!(!qos.express);
    }

    #[test]
    fn priority_values() {
        assert_eq!(Priority::RealTime as u8, 1);
        assert_eq!(Priority::Background as u8, 7);
        assert_eq!(Priority::try_from(4).unwrap(), Priority::DataHigh);
        assert!(Priority::try_from(0).is_err());
        assert!(Priority::try_from(8).is_err());
        assert!(Priority::MAX < Priority::MIN);
    }

    #[test]
    fn builder_style_setters() {
        let qos = QoS::default()
            .priority(Priority::RealTime)
            .congestion_control(CongestionControl::Block)
            .express(true);
        assert_eq!(qos.priority, Priority::RealTime);
        assert_eq!(qos.congestion_control, CongestionControl::Block);
        assert!(qos.express);
    }
}
