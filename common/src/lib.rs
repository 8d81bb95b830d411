pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod indicator;
pub mod protocol;
pub mod schedule;
pub mod topics;
pub mod types;

pub use color::{kelvin_to_mired, mired_to_kelvin, CctRange};
pub use config::{ControllerConfig, PersistedSettings};
pub use engine::{CommandOutcome, EngineAction, PerfektDayEngine, Reply, SessionState};
pub use error::{ClockSyncError, ParseError};
pub use guard::{PushMode, PushTicket, UpdateGuard};
pub use indicator::{BlinkTiming, BlinkToken, ButtonEvent, Indicator};
pub use protocol::{Frame, FrameAssembler, Response};
pub use schedule::{minutes_since_midnight, schedule_for, CycleReview};
pub use topics::*;
pub use types::{LedState, SolarPoint, TimeOfDay};
