// Service module
// This module handles the companion media server: REST calls, the throttled
// catalog refresh and status polling

pub mod cache;
pub mod client;
pub mod poller;

pub use cache::{RefreshCache, REFRESH_THROTTLE};
pub use client::{
    validate_size_limits, CleanupResult, ServiceClient, ServiceError, ServiceStatus,
    IMAGE_LIMIT_RANGE, VIDEO_LIMIT_RANGE,
};
pub use poller::StatusPoller;
