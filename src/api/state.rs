//! State shared by all API handlers

use crate::monitor::Monitor;

#[derive(Clone)]
pub struct ApiState {
    pub monitor: Monitor,
}

impl ApiState {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }
}
