//! rollcall-core: Roster enrollment and the attendance state machine.
//!
//! Face detection, embedding, and frame capture are reached through the
//! [`FaceVision`] and [`VideoSource`] traits; this crate never looks inside them.

pub mod ledger;
pub mod roster;
pub mod session;
pub mod types;
pub mod vision;

pub use ledger::{AttendanceLog, AttendanceRecord, LogError};
pub use roster::{encode_roster, EnrollmentError, Roster, RosterEntry, RosterReport};
pub use session::{
    AttendanceSession, Clock, SessionEnd, SessionError, SessionOptions, SessionSummary, StopFlag,
    StopSignal, SystemClock,
};
pub use types::{
    BoundingBox, CosineMatcher, Embedding, EuclideanMatcher, Identity, MatchMetric, MatchResult,
    Matcher,
};
pub use vision::{CaptureError, FaceVision, VideoSource, VisionError};
